//! Field-level comparison of versioned snapshots.
//!
//! Only tracked fields participate. Option and requirement lists are
//! order-sensitive; tag sets are not. Cosmetic bookkeeping (ids,
//! timestamps, version counters) is excluded by construction: it never
//! enters the tracked payload.

use std::collections::BTreeSet;

use crate::base::{QuestionFields, SectionFields, TemplateFields, VersionedRecord};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    Changed,
}

impl Change {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

fn set_eq(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// `old = None` means no prior publication to compare against; the caller
/// decides whether that counts as drift (see the cascade's missing-old rule).
pub fn compare_templates(old: Option<&TemplateFields>, new: &TemplateFields) -> Change {
    let Some(old) = old else {
        return Change::Changed;
    };
    if old.name == new.name && old.description == new.description {
        Change::Unchanged
    } else {
        Change::Changed
    }
}

pub fn compare_sections(old: &SectionFields, new: &SectionFields) -> Change {
    let same = old.name == new.name
        && old.guidance == new.guidance
        && old.display_order == new.display_order
        && old.requirements == new.requirements
        && set_eq(&old.tags, &new.tags);
    if same { Change::Unchanged } else { Change::Changed }
}

pub fn compare_questions(old: &QuestionFields, new: &QuestionFields) -> Change {
    let same = old.text == new.text
        && old.required == new.required
        && old.display_order == new.display_order
        && old.options == new.options
        && set_eq(&old.tags, &new.tags);
    if same { Change::Unchanged } else { Change::Changed }
}

/// Compare two section publication records. Equal fingerprints short-circuit;
/// otherwise both payloads are decoded and compared field by field (tag order
/// alone can change the fingerprint without changing the section).
pub fn compare_section_records(
    old: &VersionedRecord,
    new: &VersionedRecord,
) -> Result<Change, CoreError> {
    if old.fingerprint == new.fingerprint {
        return Ok(Change::Unchanged);
    }
    let old = SectionFields::from_msgpack(&old.payload)?;
    let new = SectionFields::from_msgpack(&new.payload)?;
    Ok(compare_sections(&old, &new))
}

pub fn compare_question_records(
    old: &VersionedRecord,
    new: &VersionedRecord,
) -> Result<Change, CoreError> {
    if old.fingerprint == new.fingerprint {
        return Ok(Change::Unchanged);
    }
    let old = QuestionFields::from_msgpack(&old.payload)?;
    let new = QuestionFields::from_msgpack(&new.payload)?;
    Ok(compare_questions(&old, &new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::VersionId;

    fn question() -> QuestionFields {
        QuestionFields {
            text: "What data will you collect?".into(),
            required: false,
            display_order: 1,
            options: vec!["Survey".into(), "Interview".into()],
            tags: vec!["data".into(), "methods".into()],
        }
    }

    fn section() -> SectionFields {
        SectionFields {
            name: "Data Collection".into(),
            guidance: "Describe instruments".into(),
            display_order: 0,
            requirements: vec!["storage plan".into()],
            tags: vec!["data".into()],
        }
    }

    fn record(fields: &QuestionFields) -> VersionedRecord {
        VersionedRecord {
            version_id: VersionId::new(),
            fingerprint: fields.fingerprint().unwrap(),
            payload: fields.to_msgpack().unwrap(),
        }
    }

    #[test]
    fn identical_questions_unchanged() {
        assert_eq!(compare_questions(&question(), &question()), Change::Unchanged);
    }

    #[test]
    fn each_tracked_question_field_detected() {
        let base = question();

        let mut q = base.clone();
        q.text = "What data will you produce?".into();
        assert!(compare_questions(&base, &q).is_changed());

        let mut q = base.clone();
        q.required = true;
        assert!(compare_questions(&base, &q).is_changed());

        let mut q = base.clone();
        q.display_order = 2;
        assert!(compare_questions(&base, &q).is_changed());

        let mut q = base.clone();
        q.options.push("Sensor".into());
        assert!(compare_questions(&base, &q).is_changed());

        let mut q = base.clone();
        q.tags.push("ethics".into());
        assert!(compare_questions(&base, &q).is_changed());
    }

    #[test]
    fn option_order_is_significant() {
        let base = question();
        let mut q = base.clone();
        q.options.reverse();
        assert!(compare_questions(&base, &q).is_changed());
    }

    #[test]
    fn tag_order_is_not_significant() {
        let base = question();
        let mut q = base.clone();
        q.tags.reverse();
        assert_eq!(compare_questions(&base, &q), Change::Unchanged);

        let mut s = section();
        let base_s = section();
        s.tags = vec![];
        assert!(compare_sections(&base_s, &s).is_changed());
    }

    #[test]
    fn requirement_order_is_significant() {
        let base = section();
        let mut s = base.clone();
        s.requirements = vec!["b".into(), "a".into()];
        let mut base2 = base.clone();
        base2.requirements = vec!["a".into(), "b".into()];
        assert!(compare_sections(&base2, &s).is_changed());
    }

    #[test]
    fn missing_old_template_is_changed() {
        let new = TemplateFields {
            name: "NSF Generic".into(),
            description: String::new(),
        };
        assert!(compare_templates(None, &new).is_changed());
        assert_eq!(compare_templates(Some(&new.clone()), &new), Change::Unchanged);
    }

    #[test]
    fn record_fingerprint_short_circuit() {
        let q = question();
        let a = record(&q);
        let b = record(&q);
        assert_eq!(compare_question_records(&a, &b).unwrap(), Change::Unchanged);
    }

    #[test]
    fn record_tag_shuffle_unchanged() {
        let q = question();
        let mut shuffled = q.clone();
        shuffled.tags.reverse();
        let a = record(&q);
        let b = record(&shuffled);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(compare_question_records(&a, &b).unwrap(), Change::Unchanged);
    }

    #[test]
    fn malformed_record_is_an_error() {
        let q = question();
        let good = record(&q);
        let bad = VersionedRecord {
            version_id: VersionId::new(),
            fingerprint: [0u8; 32],
            payload: vec![0xc1],
        };
        let err = compare_question_records(&bad, &good).unwrap_err();
        assert!(matches!(err, CoreError::MalformedSnapshot(_)));
    }
}

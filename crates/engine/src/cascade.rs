//! Pure per-unit evaluation.
//!
//! Each node's status is a function of (old publication, new publication,
//! the node's tracked pointer); the root's final status is the worst over
//! itself and every child. No store access happens in here.

use dmphub_core::{
    diff::{self, Change},
    ids::VersionId,
    overlay::{NodeContent, NodeRef},
    status::MigrationStatus,
};
use dmphub_storage::{PublishedTemplate, UnitGraph};

#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node: NodeRef,
    pub status: MigrationStatus,
    /// The new base Versioned* row the node was evaluated against, when one
    /// exists. Orphaned nodes have nothing to re-version against.
    pub source_version_id: Option<VersionId>,
    pub content: NodeContent,
    pub diff_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    /// Worst over the root's own diff and every child node.
    pub root_status: MigrationStatus,
    /// The root's own template-level diff, before aggregation. Only this
    /// drives a root chain advance; staleness inherited from children does
    /// not re-snapshot the root.
    pub root_tentative: MigrationStatus,
    pub root_source: Option<VersionId>,
    pub root_content: NodeContent,
    pub nodes: Vec<NodeOutcome>,
}

fn status_of(change: Change) -> MigrationStatus {
    if change.is_changed() {
        MigrationStatus::Stale
    } else {
        MigrationStatus::Ok
    }
}

/// Status for a node whose tracked entity exists now but has no record in
/// the prior publication. A node authored after that prior publication was
/// written against newer state, so nothing it saw has drifted; a node that
/// predates it lost its comparison basis and is conservatively stale.
fn missing_old_status(
    node_created_ms: i64,
    old: Option<&PublishedTemplate>,
    new_published_ms: i64,
) -> MigrationStatus {
    match old {
        Some(prior) if node_created_ms < prior.template.created_at_ms => MigrationStatus::Stale,
        Some(_) => MigrationStatus::Ok,
        None if node_created_ms >= new_published_ms => MigrationStatus::Ok,
        None => MigrationStatus::Stale,
    }
}

struct TrackedEval {
    status: MigrationStatus,
    source_version_id: Option<VersionId>,
    diff_error: Option<String>,
}

fn eval_section(
    section_id: dmphub_core::ids::SectionId,
    node_created_ms: i64,
    old: Option<&PublishedTemplate>,
    new: &PublishedTemplate,
) -> TrackedEval {
    let Some(new_rec) = new.sections.get(&section_id) else {
        return TrackedEval {
            status: MigrationStatus::Orphaned,
            source_version_id: None,
            diff_error: None,
        };
    };
    let source_version_id = Some(new_rec.version_id);
    match old.and_then(|p| p.sections.get(&section_id)) {
        Some(old_rec) => match diff::compare_section_records(old_rec, new_rec) {
            Ok(change) => TrackedEval {
                status: status_of(change),
                source_version_id,
                diff_error: None,
            },
            // Unreadable snapshot: conservatively stale, error surfaced.
            Err(e) => TrackedEval {
                status: MigrationStatus::Stale,
                source_version_id,
                diff_error: Some(e.to_string()),
            },
        },
        None => TrackedEval {
            status: missing_old_status(node_created_ms, old, new.template.created_at_ms),
            source_version_id,
            diff_error: None,
        },
    }
}

fn eval_question(
    question_id: dmphub_core::ids::QuestionId,
    node_created_ms: i64,
    old: Option<&PublishedTemplate>,
    new: &PublishedTemplate,
) -> TrackedEval {
    let Some(new_rec) = new.questions.get(&question_id) else {
        return TrackedEval {
            status: MigrationStatus::Orphaned,
            source_version_id: None,
            diff_error: None,
        };
    };
    let source_version_id = Some(new_rec.version_id);
    match old.and_then(|p| p.questions.get(&question_id)) {
        Some(old_rec) => match diff::compare_question_records(old_rec, new_rec) {
            Ok(change) => TrackedEval {
                status: status_of(change),
                source_version_id,
                diff_error: None,
            },
            Err(e) => TrackedEval {
                status: MigrationStatus::Stale,
                source_version_id,
                diff_error: Some(e.to_string()),
            },
        },
        None => TrackedEval {
            status: missing_old_status(node_created_ms, old, new.template.created_at_ms),
            source_version_id,
            diff_error: None,
        },
    }
}

fn untracked() -> TrackedEval {
    TrackedEval {
        status: MigrationStatus::Ok,
        source_version_id: None,
        diff_error: None,
    }
}

pub fn evaluate_unit(
    graph: &UnitGraph,
    old: Option<&PublishedTemplate>,
    new: Option<&PublishedTemplate>,
) -> UnitOutcome {
    let root_content = graph.customization.content();

    // No published version left to track: the root orphans and children are
    // not evaluated (there is nothing to compare them against).
    let Some(new) = new else {
        return UnitOutcome {
            root_status: MigrationStatus::Orphaned,
            root_tentative: MigrationStatus::Orphaned,
            root_source: None,
            root_content,
            nodes: Vec::new(),
        };
    };

    let root_tentative = match old {
        Some(prior) => status_of(diff::compare_templates(
            Some(&prior.template.tracked()),
            &new.template.tracked(),
        )),
        None => missing_old_status(
            graph.customization.created_at_ms,
            None,
            new.template.created_at_ms,
        ),
    };

    let mut nodes = Vec::with_capacity(graph.node_count());

    for cs in &graph.custom_sections {
        let eval = match cs.follows_section_id {
            Some(section_id) => eval_section(section_id, cs.created_at_ms, old, new),
            None => untracked(),
        };
        nodes.push(NodeOutcome {
            node: cs.node_ref(),
            status: eval.status,
            source_version_id: eval.source_version_id,
            content: cs.content(),
            diff_error: eval.diff_error,
        });
    }

    for cq in &graph.custom_questions {
        let eval = match cq.follows_question_id {
            Some(question_id) => eval_question(question_id, cq.created_at_ms, old, new),
            None => untracked(),
        };
        nodes.push(NodeOutcome {
            node: cq.node_ref(),
            status: eval.status,
            source_version_id: eval.source_version_id,
            content: cq.content(),
            diff_error: eval.diff_error,
        });
    }

    for sc in &graph.section_customizations {
        let eval = eval_section(sc.section_id, sc.created_at_ms, old, new);
        nodes.push(NodeOutcome {
            node: sc.node_ref(),
            status: eval.status,
            source_version_id: eval.source_version_id,
            content: sc.content(),
            diff_error: eval.diff_error,
        });
    }

    for qc in &graph.question_customizations {
        let eval = eval_question(qc.question_id, qc.created_at_ms, old, new);
        nodes.push(NodeOutcome {
            node: qc.node_ref(),
            status: eval.status,
            source_version_id: eval.source_version_id,
            content: qc.content(),
            diff_error: eval.diff_error,
        });
    }

    let root_status = nodes
        .iter()
        .fold(root_tentative, |worst, n| worst.worst(n.status));

    UnitOutcome {
        root_status,
        root_tentative,
        root_source: Some(new.template.version_id),
        root_content,
        nodes,
    }
}

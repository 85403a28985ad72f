use std::sync::atomic::AtomicBool;

use dmphub_core::overlay::NodeRef;
use dmphub_core::status::MigrationStatus;
use dmphub_engine::pool::SqlitePathOpener;
use dmphub_engine::Reconciler;
use dmphub_harness::{RecordingNotifier, TestBench};
use dmphub_storage::Store;

fn stored_node_status(
    bench: &TestBench,
    table: &str,
    id_col: &str,
    id: [u8; 16],
) -> Result<String, Box<dyn std::error::Error>> {
    let status = bench.store.conn().query_row(
        &format!("SELECT migration_status FROM {table} WHERE {id_col} = ?1"),
        rusqlite::params![id.as_slice()],
        |row| row.get(0),
    )?;
    Ok(status)
}

// ============================================================================
// Whole-template reconciliation runs
// ============================================================================

#[test]
fn republish_with_no_customizations_yields_empty_report() -> Result<(), Box<dyn std::error::Error>>
{
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    bench.publish(template)?;
    let receipt = bench.publish(template)?;

    let report = Reconciler::new().reconcile(&mut bench.store, template, receipt.version_id)?;
    assert_eq!(report.processed, 0);
    assert!(report.failed.is_empty());
    Ok(())
}

#[test]
fn unchanged_republish_keeps_everything_ok() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    bench.customize_question(customization, question, "Use the campus repository")?;

    let receipt = bench.publish(template)?;
    let reconciler = Reconciler::new();
    let report = reconciler.reconcile(&mut bench.store, template, receipt.version_id)?;

    assert_eq!(report.processed, 1);
    assert_eq!(report.unchanged, vec![customization]);
    assert!(report.stale.is_empty() && report.orphaned.is_empty());

    let view = reconciler.migration_status(&bench.store, customization)?;
    assert_eq!(view.status, MigrationStatus::Ok);
    assert!(view.last_reconciled_at.is_some());
    Ok(())
}

#[test]
fn required_flag_flip_marks_tracking_node_and_root_stale() -> Result<(), Box<dyn std::error::Error>>
{
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;

    bench.set_question_required(question, true)?;
    let receipt = bench.publish(template)?;

    let report = Reconciler::new().reconcile(&mut bench.store, template, receipt.version_id)?;
    assert_eq!(report.stale, vec![customization]);

    let status = stored_node_status(
        &bench,
        "question_customizations",
        "question_customization_id",
        *qc.as_bytes(),
    )?;
    assert_eq!(status, "stale");

    // The stale node got a new chain link taken against the new publication.
    let node = NodeRef::QuestionCustomization(qc);
    assert_eq!(bench.snapshot_count(node)?, 1);
    let head = bench.store.chain_head(node)?.unwrap();
    assert!(receipt.question_version_ids.contains(&head.source_version_id));
    Ok(())
}

#[test]
fn removed_question_orphans_its_tracking_nodes() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;
    let cq = bench.add_custom_question(
        customization,
        None,
        Some(question),
        "Which storage tier applies?",
    )?;

    bench.store.remove_question(question)?;
    let receipt = bench.publish(template)?;

    let report = Reconciler::new().reconcile(&mut bench.store, template, receipt.version_id)?;
    assert_eq!(report.orphaned, vec![customization]);

    let qc_status = stored_node_status(
        &bench,
        "question_customizations",
        "question_customization_id",
        *qc.as_bytes(),
    )?;
    let cq_status = stored_node_status(
        &bench,
        "custom_questions",
        "custom_question_id",
        *cq.as_bytes(),
    )?;
    assert_eq!(qc_status, "orphaned");
    assert_eq!(cq_status, "orphaned");

    // Orphaned nodes have no new base version to snapshot against.
    assert_eq!(bench.snapshot_count(NodeRef::QuestionCustomization(qc))?, 0);
    Ok(())
}

#[test]
fn template_delete_orphans_the_customization() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let receipt = bench.publish(template)?;
    let customization = bench.customize(template)?;

    bench.store.delete_template(template)?;

    let reconciler = Reconciler::new();
    let report = reconciler.reconcile(&mut bench.store, template, receipt.version_id)?;
    assert_eq!(report.orphaned, vec![customization]);
    assert_eq!(
        reconciler.migration_status(&bench.store, customization)?.status,
        MigrationStatus::Orphaned
    );
    Ok(())
}

#[test]
fn worst_child_status_wins_and_siblings_stay_independent(
) -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let stable = bench.add_section(template, "Preservation", 1)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    // X tracks both a question that will disappear and a section that will
    // be renamed; Y only tracks a section that never changes.
    let x = bench.customize(template)?;
    bench.customize_question(x, question, "Use the campus repository")?;
    let x_sc = bench.customize_section(x, section, "See local policy")?;
    let y = bench.customize(template)?;
    bench.customize_section(y, stable, "No additions")?;

    bench.store.remove_question(question)?;
    bench.rename_section(section, "Data Collection & Reuse")?;
    let receipt = bench.publish(template)?;

    let report = Reconciler::new().reconcile(&mut bench.store, template, receipt.version_id)?;
    assert_eq!(report.processed, 2);
    assert_eq!(report.orphaned, vec![x]);
    assert_eq!(report.unchanged, vec![y]);

    // The renamed section is stale on its own even though the root
    // aggregated to orphaned.
    let sc_status = stored_node_status(
        &bench,
        "section_customizations",
        "section_customization_id",
        *x_sc.as_bytes(),
    )?;
    assert_eq!(sc_status, "stale");
    Ok(())
}

#[test]
fn status_recovers_once_the_drift_is_behind_us() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    bench.customize_question(customization, question, "Use the campus repository")?;

    bench.set_question_required(question, true)?;
    let v2 = bench.publish(template)?;
    let reconciler = Reconciler::new();
    let report = reconciler.reconcile(&mut bench.store, template, v2.version_id)?;
    assert_eq!(report.stale, vec![customization]);

    // Nothing changed between v2 and v3, so the next run recomputes Ok.
    let v3 = bench.publish(template)?;
    let report = reconciler.reconcile(&mut bench.store, template, v3.version_id)?;
    assert_eq!(report.unchanged, vec![customization]);
    assert_eq!(
        reconciler.migration_status(&bench.store, customization)?.status,
        MigrationStatus::Ok
    );
    Ok(())
}

#[test]
fn notifier_fires_only_on_transitions() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    bench.customize_question(customization, question, "Use the campus repository")?;

    bench.set_question_required(question, true)?;
    let receipt = bench.publish(template)?;

    let notifier = RecordingNotifier::new();
    let events = notifier.handle();
    let mut reconciler = Reconciler::new();
    reconciler.set_notifier(Box::new(notifier));

    reconciler.reconcile(&mut bench.store, template, receipt.version_id)?;
    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].customization_id, customization);
        assert_eq!(events[0].previous, MigrationStatus::Ok);
        assert_eq!(events[0].current, MigrationStatus::Stale);
    }

    // Same status on the second run: no event.
    reconciler.reconcile(&mut bench.store, template, receipt.version_id)?;
    assert_eq!(events.lock().unwrap().len(), 1);
    Ok(())
}

#[test]
fn parallel_run_matches_sequential() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::on_disk()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    for org in 0..6 {
        let customization = bench.customize(template)?;
        if org % 2 == 0 {
            bench.customize_question(customization, question, "Org guidance")?;
        }
    }

    bench.set_question_required(question, true)?;
    let receipt = bench.publish(template)?;

    let reconciler = Reconciler::new();
    let mut sequential = reconciler.reconcile(&mut bench.store, template, receipt.version_id)?;

    let opener = SqlitePathOpener::new(bench.db_path().unwrap());
    let cancel = AtomicBool::new(false);
    let mut parallel =
        reconciler.reconcile_parallel(&opener, template, receipt.version_id, 3, &cancel)?;

    for report in [&mut sequential, &mut parallel] {
        report.stale.sort();
        report.unchanged.sort();
        report.orphaned.sort();
    }
    assert_eq!(sequential, parallel);
    assert_eq!(sequential.processed, 6);
    Ok(())
}

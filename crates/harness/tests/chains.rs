use dmphub_core::overlay::NodeRef;
use dmphub_engine::Reconciler;
use dmphub_harness::TestBench;
use dmphub_storage::Store;

fn customization_status(
    bench: &TestBench,
    id: dmphub_core::ids::CustomizationId,
) -> Result<String, Box<dyn std::error::Error>> {
    let status = bench.store.conn().query_row(
        "SELECT status FROM customizations WHERE customization_id = ?1",
        rusqlite::params![id.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    Ok(status)
}

// ============================================================================
// Overlay snapshot chains
// ============================================================================

#[test]
fn overlay_publication_freezes_every_node_at_genesis() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    let receipt = bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;
    let cs = bench.add_custom_section(customization, None, "Institutional policies")?;

    let reconciler = Reconciler::new();
    reconciler.publish_customization(&mut bench.store, customization)?;

    assert_eq!(customization_status(&bench, customization)?, "published");

    for node in [
        NodeRef::Customization(customization),
        NodeRef::QuestionCustomization(qc),
        NodeRef::CustomSection(cs),
    ] {
        assert_eq!(bench.snapshot_count(node)?, 1);
        let head = bench.store.chain_head(node)?.unwrap();
        assert_eq!(head.prior_id, None);
        assert_eq!(head.current_id, None);
    }

    // Tracked node snapshots point at the tracked base version; untracked
    // nodes fall back to the template publication itself.
    let qc_head = bench
        .store
        .chain_head(NodeRef::QuestionCustomization(qc))?
        .unwrap();
    assert!(receipt.question_version_ids.contains(&qc_head.source_version_id));
    let cs_head = bench.store.chain_head(NodeRef::CustomSection(cs))?.unwrap();
    assert_eq!(cs_head.source_version_id, receipt.version_id);
    Ok(())
}

#[test]
fn republishing_against_the_same_base_version_adds_no_rows(
) -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;

    let reconciler = Reconciler::new();
    reconciler.publish_customization(&mut bench.store, customization)?;
    reconciler.publish_customization(&mut bench.store, customization)?;

    assert_eq!(bench.snapshot_count(NodeRef::QuestionCustomization(qc))?, 1);
    assert_eq!(bench.snapshot_count(NodeRef::Customization(customization))?, 1);
    Ok(())
}

#[test]
fn reconciliation_advances_the_chain_without_forking() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;
    let node = NodeRef::QuestionCustomization(qc);

    let reconciler = Reconciler::new();
    reconciler.publish_customization(&mut bench.store, customization)?;
    let genesis = bench.store.chain_head(node)?.unwrap();

    bench.set_question_required(question, true)?;
    let v2 = bench.publish(template)?;
    reconciler.reconcile(&mut bench.store, template, v2.version_id)?;

    assert_eq!(bench.snapshot_count(node)?, 2);
    assert_eq!(bench.head_count(node)?, 1);
    let head = bench.store.chain_head(node)?.unwrap();
    assert_eq!(head.prior_id, Some(genesis.snapshot_id));
    assert_ne!(head.source_version_id, genesis.source_version_id);

    // The retired genesis row now points forward to the new head.
    let forwarded: Vec<u8> = bench.store.conn().query_row(
        "SELECT current_id FROM overlay_snapshots WHERE snapshot_id = ?1",
        rusqlite::params![genesis.snapshot_id.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    assert_eq!(forwarded, head.snapshot_id.as_bytes().to_vec());
    Ok(())
}

#[test]
fn reconciling_twice_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;

    bench.set_question_required(question, true)?;
    let v2 = bench.publish(template)?;

    let reconciler = Reconciler::new();
    let first = reconciler.reconcile(&mut bench.store, template, v2.version_id)?;
    let node = NodeRef::QuestionCustomization(qc);
    let rows_after_first = bench.snapshot_count(node)?;

    let second = reconciler.reconcile(&mut bench.store, template, v2.version_id)?;
    assert_eq!(first, second);
    assert_eq!(bench.snapshot_count(node)?, rows_after_first);
    assert_eq!(bench.head_count(node)?, 1);
    Ok(())
}

#[test]
fn successive_publications_build_a_linear_chain() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::in_memory()?;
    let template = bench.create_template("Generic DMP")?;
    let section = bench.add_section(template, "Data Collection", 0)?;
    let question = bench.add_question(section, "What data will you collect?", false, 0)?;
    bench.publish(template)?;

    let customization = bench.customize(template)?;
    let qc = bench.customize_question(customization, question, "Use the campus repository")?;
    let node = NodeRef::QuestionCustomization(qc);

    let reconciler = Reconciler::new();
    reconciler.publish_customization(&mut bench.store, customization)?;

    for round in 0..3 {
        bench.retag_question(question, vec![format!("round-{round}")])?;
        let receipt = bench.publish(template)?;
        reconciler.reconcile(&mut bench.store, template, receipt.version_id)?;
    }

    assert_eq!(bench.snapshot_count(node)?, 4);
    assert_eq!(bench.head_count(node)?, 1);

    // Exactly one genesis row, every other row reachable through prior_id.
    let genesis_rows: i64 = bench.store.conn().query_row(
        "SELECT COUNT(*) FROM overlay_snapshots
         WHERE node_kind = ?1 AND node_id = ?2 AND prior_id IS NULL",
        rusqlite::params![node.kind().as_str(), node.id_bytes().as_slice()],
        |row| row.get(0),
    )?;
    assert_eq!(genesis_rows, 1);
    Ok(())
}

use pagepatch_common::locator::Locator;
use pagepatch_common::transfer::ImportError;
use pagepatch_common::types::PatchKind;
use pagepatch_engine::session::{EditCommand, Session, SessionError};
use pagepatch_engine::store::{MemoryKv, SqliteKv};
use pagepatch_engine::tree::query::TreeQuery;
use pagepatch_engine::tree::{Document, NodeId};
use pagepatch_engine::undo::RevertOutcome;
use pagepatch_engine::EngineConfig;
use tempfile::TempDir;

const ADDRESS: &str = "https://shop.test/item/42";
const PRODUCT_PAGE: &str = "<html><body><main id=app><h1>Widget</h1>\
    <p class=price-row>Price: <span id=price>$10</span></p></main></body></html>";

fn find(doc: &Document, selector: &str) -> NodeId {
    TreeQuery::new(doc)
        .deep_query_first(doc.root(), selector)
        .expect("selector should parse")
        .expect("node should exist")
}

fn memory_session() -> Session<MemoryKv> {
    Session::activate(MemoryKv::new(), EngineConfig::default(), ADDRESS, None)
        .expect("session should activate")
}

#[test]
fn set_text_survives_a_reload() {
    let dir = TempDir::new().expect("tempdir should be created");
    let db = dir.path().join("store.db");

    let kv = SqliteKv::open(&db).expect("store should open");
    let mut session =
        Session::activate(kv, EngineConfig::default(), ADDRESS, None).expect("session should activate");
    let mut doc = Document::parse(PRODUCT_PAGE);
    let price = find(&doc, "#price");
    session
        .commit_edit(&mut doc, &[price], &EditCommand::set_text("$12"))
        .expect("edit should commit");

    let stored = session.patches().to_vec();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].locator, Locator::css("#price"));
    assert_eq!(stored[0].kind, PatchKind::SetText);
    assert_eq!(stored[0].value, "$12");
    drop(session.deactivate().expect("deactivate should flush"));

    // Fresh page load, fresh process.
    let kv = SqliteKv::open(&db).expect("store should reopen");
    let mut session =
        Session::activate(kv, EngineConfig::default(), ADDRESS, None).expect("session should activate");
    let mut reloaded = Document::parse(PRODUCT_PAGE);
    let summary = session.apply_all(&mut reloaded);
    assert_eq!(summary.applied, 1);
    assert_eq!(reloaded.text_content(find(&reloaded, "#price")), "$12");
}

#[test]
fn repeated_edits_upsert_and_undo_step_by_step() {
    let mut doc = Document::parse(PRODUCT_PAGE);
    let mut session = memory_session();
    let price = find(&doc, "#price");

    session.commit_edit(&mut doc, &[price], &EditCommand::set_text("$12")).expect("first edit");
    let first_id = session.patches()[0].id.clone();
    session.commit_edit(&mut doc, &[price], &EditCommand::set_text("$15")).expect("second edit");

    assert_eq!(session.patches().len(), 1);
    assert_eq!(session.patches()[0].id, first_id);
    assert_eq!(session.patches()[0].value, "$15");
    assert_eq!(session.undo_depth(), 2);

    session.undo_last(&mut doc).expect("first undo");
    assert_eq!(doc.text_content(price), "$12");
    session.undo_last(&mut doc).expect("second undo");
    assert_eq!(doc.text_content(price), "$10");
    assert!(session.patches().is_empty());
}

#[test]
fn hide_reaches_into_a_shadow_root_by_host_path() {
    let markup = "<body><x-widget><template shadowrootmode=\"open\">\
        <div class=inner>promo</div></template></x-widget></body>";
    let mut doc = Document::parse(markup);
    let mut session = memory_session();

    let payload = r#"{
        "patches": [{
            "id": "5f0c6a43-5a8d-4c5e-9a39-0d0e6f5b2f11",
            "locator": {"type": "shadow", "hostPath": ["x-widget"], "innerSelector": ".inner"},
            "kind": "hide",
            "value": "",
            "createdAt": "2026-01-05T10:00:00Z"
        }]
    }"#;
    let report = session.import(&mut doc, payload).expect("import should succeed");
    assert_eq!(report.applied.applied, 1);

    let inner = find(&doc, ".inner");
    let style = doc.attr(inner, "style").expect("style should be set");
    assert!(style.contains("display: none !important"), "unexpected style `{style}`");

    let locator = session.patches()[0].locator.clone();
    assert_eq!(locator.to_string(), "x-widget >>> .inner");
    assert_eq!(session.resolve_all(&doc, &locator), vec![inner]);
    assert!(TreeQuery::new(&doc).matches_in(doc.root(), ".inner").is_empty());
}

#[test]
fn malformed_import_leaves_store_untouched() {
    let mut doc = Document::parse(PRODUCT_PAGE);
    let mut session = memory_session();
    let price = find(&doc, "#price");
    session.commit_edit(&mut doc, &[price], &EditCommand::set_text("$12")).expect("edit");
    let before = session.patches().to_vec();

    let err = session
        .import(&mut doc, r#"{"patches":"not-a-list"}"#)
        .expect_err("import should be rejected");
    assert!(matches!(err, SessionError::Import(ImportError::PatchesNotAList)));
    assert_eq!(session.patches(), before.as_slice());
    assert_eq!(session.kv().writes(), 0);
}

#[test]
fn remove_then_undo_reinserts_under_the_old_parent() {
    let mut doc = Document::parse("<ul id=list><li id=a>a</li><li id=b>b</li></ul>");
    let mut session = memory_session();
    let a = find(&doc, "#a");

    session.commit_edit(&mut doc, &[a], &EditCommand::remove()).expect("remove should commit");
    assert!(!doc.is_attached(a));
    assert_eq!(session.patches()[0].kind, PatchKind::Remove);

    let report = session.undo_last(&mut doc).expect("undo");
    assert_eq!(report.outcomes, vec![RevertOutcome::Reinserted]);
    // Reinsertion appends; original sibling order is not restored.
    assert_eq!(doc.inner_html(find(&doc, "#list")), "<li id=\"b\">b</li><li id=\"a\">a</li>");
    assert!(session.patches().is_empty());
}

#[test]
fn remove_undo_is_a_no_op_when_the_parent_is_gone() {
    let mut doc = Document::parse("<section id=s><ul id=list><li id=a>a</li></ul></section>");
    let mut session = memory_session();
    let a = find(&doc, "#a");
    let list = find(&doc, "#list");

    session.commit_edit(&mut doc, &[a], &EditCommand::remove()).expect("remove should commit");
    doc.detach(list).expect("list should detach");

    let report = session.undo_last(&mut doc).expect("undo");
    assert_eq!(report.outcomes, vec![RevertOutcome::ParentDetached]);
    assert!(session.patches().is_empty());
}

#[test]
fn second_apply_pass_changes_nothing() {
    let mut doc = Document::parse(PRODUCT_PAGE);
    let mut session = memory_session();
    let h1 = find(&doc, "h1");
    let row = find(&doc, ".price-row");
    session.commit_edit(&mut doc, &[h1], &EditCommand::set_html("<em>Widget</em> Pro")).expect("html");
    session.commit_edit(&mut doc, &[row], &EditCommand::append_style("color: red")).expect("style");
    session
        .commit_edit(&mut doc, &[h1], &EditCommand::set_attribute("title", "Flagship"))
        .expect("attribute");

    // Reload, then reconcile twice.
    let mut reloaded = Document::parse(PRODUCT_PAGE);
    let first = session.apply_all(&mut reloaded);
    assert_eq!(first.applied, 3);
    let snapshot = reloaded.outer_html(reloaded.root());
    reloaded.take_mutations();

    let second = session.apply_all(&mut reloaded);
    assert_eq!(second.applied, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(reloaded.pending_mutations(), 0);
    assert_eq!(reloaded.outer_html(reloaded.root()), snapshot);
}

#[test]
fn stale_locator_is_skipped_until_content_renders() {
    let mut doc = Document::parse("<body><div id=feed></div></body>");
    let mut session = memory_session();
    let payload = r##"{"patches":[{"locator":"#late","kind":"set_text","value":"ready"}]}"##;
    let report = session.import(&mut doc, payload).expect("legacy locator should import");
    assert_eq!(report.applied.skipped, 1);

    let feed = find(&doc, "#feed");
    doc.append_html(feed, "<p id=late>loading</p>").expect("late content should render");
    let summary = session.apply_all(&mut doc);
    assert_eq!(summary.applied, 1);
    assert_eq!(doc.text_content(find(&doc, "#late")), "ready");
}

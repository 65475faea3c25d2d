use tandem_editor_core::{
    Document, Element, Mark, Node, NodeKey, NodeProperties, Operation, Text, Value,
};
use tandem_editor_crdt::{
    ActorId, ClientSession, Coordinator, CoordinatorState, CrdtDocument, Message, NullView,
    SyncConfig, SyncOutcome, codec,
};

fn hello() -> Value {
    Value::new(Document::new(vec![Node::Block(Element::new(
        "p",
        "paragraph",
        vec![Node::Text(Text::plain("t", "Hello"))],
    ))]))
}

fn hello_world() -> Value {
    Value::new(Document::new(vec![
        Node::Block(Element::new("p1", "paragraph", vec![Node::Text(Text::plain("t1", "Hello"))])),
        Node::Block(Element::new("p2", "paragraph", vec![Node::Text(Text::plain("t2", "World"))])),
    ]))
}

fn text_at<'a>(value: &'a Value, path: &[usize]) -> &'a Text {
    value.document.node(path).and_then(Node::as_text).unwrap()
}

fn assert_converged_with_documents(c: &Coordinator) {
    assert!(c.is_converged());
    for session in c.sessions() {
        assert_eq!(session.document().unwrap().value().unwrap(), session.value().document);
    }
}

#[test]
fn offline_insert_and_bold_reconcile_on_reconnect() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello(), 2).unwrap();
    c.set_online(false).unwrap();
    assert_eq!(c.state(), CoordinatorState::Offline);

    c.local_edit(0, &[Operation::insert_text(vec![0, 0], 5, " world")])
        .unwrap();
    c.local_edit(1, &[Operation::add_mark(vec![0, 0], 0, 5, "bold")])
        .unwrap();
    assert!(!c.is_converged());

    c.set_online(true).unwrap();
    assert_converged_with_documents(&c);

    let value = c.session(0).unwrap().value();
    assert_eq!(value.document.plain_text(), "Hello world");
    let chars = text_at(value, &[0, 0]).chars_with_marks();
    assert!(chars[..5].iter().all(|(_, marks)| marks.contains(&Mark::new("bold"))));
    assert!(chars[5..].iter().all(|(_, marks)| marks.is_empty()));
}

fn merge_away_second_paragraph() -> [Operation; 2] {
    [
        Operation::MergeNode {
            path: vec![1],
            position: 1,
        },
        Operation::MergeNode {
            path: vec![0, 1],
            position: 5,
        },
    ]
}

#[test]
fn edit_inside_merged_node_survives_reconnect() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello_world(), 2).unwrap();
    c.set_online(false).unwrap();
    c.local_edit(0, &merge_away_second_paragraph()).unwrap();
    c.local_edit(1, &[Operation::insert_text(vec![1, 0], 5, "!!!")])
        .unwrap();

    c.set_online(true).unwrap();
    assert_converged_with_documents(&c);
    let value = c.session(1).unwrap().value();
    assert_eq!(value.document.plain_text(), "HelloWorld!!!");
    assert_eq!(value.document.nodes.len(), 1);
}

#[test]
fn edit_inside_merged_node_survives_offline_sync() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello_world(), 3).unwrap();
    c.set_online(false).unwrap();
    c.local_edit(0, &merge_away_second_paragraph()).unwrap();
    c.local_edit(1, &[Operation::insert_text(vec![1, 0], 5, "!!!")])
        .unwrap();
    c.local_edit(2, &[Operation::insert_text(vec![1, 0], 0, "big ")])
        .unwrap();

    c.offline_sync().unwrap();
    assert_converged_with_documents(&c);
    assert_eq!(c.session(0).unwrap().value().document.plain_text(), "Hellobig World!!!");

    // the merged text keeps accepting edits at its far end
    c.local_edit(0, &[Operation::insert_text(vec![0, 0], 17, "?")])
        .unwrap();
    c.set_online(true).unwrap();
    assert_converged_with_documents(&c);
    assert_eq!(c.session(2).unwrap().value().document.plain_text(), "Hellobig World!!!?");
}

#[test]
fn split_racing_an_insert_keeps_both() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello_world(), 2).unwrap();
    c.set_online(false).unwrap();
    c.local_edit(
        0,
        &[Operation::SplitNode {
            path: vec![1, 0],
            position: 2,
            new_key: NodeKey::from("1:0"),
            properties: NodeProperties::default(),
        }],
    )
    .unwrap();
    c.local_edit(1, &[Operation::insert_text(vec![1, 0], 1, "o-o")])
        .unwrap();

    c.set_online(true).unwrap();
    assert_converged_with_documents(&c);
    assert_eq!(c.session(0).unwrap().value().document.plain_text(), "Hello\nWo-oorld");
}

#[test]
fn offline_sync_merges_without_network() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello(), 3).unwrap();
    c.set_online(false).unwrap();
    c.local_edit(0, &[Operation::insert_text(vec![0, 0], 0, "[")])
        .unwrap();
    c.local_edit(2, &[Operation::insert_text(vec![0, 0], 5, "]")])
        .unwrap();

    c.offline_sync().unwrap();
    assert_converged_with_documents(&c);
    assert_eq!(c.session(1).unwrap().value().document.plain_text(), "[Hello]");
    assert_eq!(c.state(), CoordinatorState::Offline);
}

#[test]
fn live_edits_reach_every_session() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello_world(), 3).unwrap();

    let outcome = c
        .local_edit(
            0,
            &[
                Operation::SplitNode {
                    path: vec![0, 0],
                    position: 2,
                    new_key: NodeKey::from("1:0"),
                    properties: NodeProperties::default(),
                },
                Operation::SplitNode {
                    path: vec![0],
                    position: 1,
                    new_key: NodeKey::from("1:1"),
                    properties: NodeProperties::default(),
                },
            ],
        )
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Patched { .. }));
    c.pump().unwrap();
    assert_converged_with_documents(&c);
    assert_eq!(c.session(2).unwrap().value().document.plain_text(), "He\nllo\nWorld");

    // concurrent edits from two sessions before anything is delivered
    c.local_edit(1, &[Operation::insert_text(vec![2, 0], 5, "!")])
        .unwrap();
    c.local_edit(2, &[Operation::insert_text(vec![0, 0], 0, "> ")])
        .unwrap();
    c.pump().unwrap();
    assert_converged_with_documents(&c);
    assert_eq!(c.session(0).unwrap().value().document.plain_text(), "> He\nllo\nWorld!");
}

#[test]
fn merge_then_insert_survives_sync() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello_world(), 2).unwrap();
    c.local_edit(
        0,
        &[
            Operation::MergeNode {
                path: vec![1],
                position: 1,
            },
            Operation::MergeNode {
                path: vec![0, 1],
                position: 5,
            },
            Operation::insert_text(vec![0, 0], 5, "X"),
        ],
    )
    .unwrap();
    c.pump().unwrap();
    assert_converged_with_documents(&c);
    let value = c.session(1).unwrap().value();
    assert_eq!(value.document.plain_text(), "HelloXWorld");
    assert_eq!(value.document.nodes.len(), 1);
    assert_eq!(value.document.node(&[0, 0]).unwrap().key().as_str(), "t1");
}

#[test]
fn offline_coordinator_delivers_nothing() {
    let mut c: Coordinator = Coordinator::from_value(SyncConfig::default(), &hello(), 2).unwrap();
    c.set_online(false).unwrap();
    let message = Message::announce("doc", ActorId(1), Default::default());
    assert_eq!(c.broadcast(0, &message).unwrap(), 0);
    c.local_edit(0, &[Operation::insert_text(vec![0, 0], 0, "x")])
        .unwrap();
    assert_eq!(c.pump().unwrap(), 0);
    assert_eq!(c.session(1).unwrap().value().document.plain_text(), "Hello");
}

#[test]
fn delivery_order_does_not_matter() {
    let bytes = CrdtDocument::from_value(ActorId(100), &hello_world())
        .unwrap()
        .save()
        .unwrap();
    let base = CrdtDocument::load(&bytes, ActorId(9)).unwrap();
    let edits = [
        (1, Operation::insert_text(vec![0, 0], 0, "a")),
        (2, Operation::add_mark(vec![1, 0], 1, 3, "italic")),
        (
            3,
            Operation::MoveNode {
                path: vec![1],
                new_path: vec![0],
            },
        ),
    ];
    let changes: Vec<_> = edits
        .iter()
        .map(|(actor, op)| {
            let doc = CrdtDocument::load(&bytes, ActorId(*actor)).unwrap();
            let changed = tandem_editor_crdt::apply_editor_ops(&doc, std::slice::from_ref(op))
                .unwrap()
                .unwrap();
            changed.changes_since(&base.clock()).unwrap().unwrap()
        })
        .collect();

    let forward = changes
        .iter()
        .fold(CrdtDocument::load(&bytes, ActorId(9)).unwrap(), |doc, c| {
            doc.apply_changes(c).unwrap()
        });
    let backward = changes
        .iter()
        .rev()
        .fold(CrdtDocument::load(&bytes, ActorId(9)).unwrap(), |doc, c| {
            doc.apply_changes(c).unwrap()
        });
    assert_eq!(forward.value().unwrap(), backward.value().unwrap());
    assert_eq!(forward.clock(), backward.clock());
    assert_eq!(forward.value().unwrap().plain_text(), "World\naHello");

    // applying again changes nothing
    let again = forward.apply_changes(&changes[0]).unwrap();
    assert_eq!(again.value().unwrap(), forward.value().unwrap());
}

#[test]
fn merge_is_commutative_and_idempotent() {
    let bytes = CrdtDocument::from_value(ActorId(100), &hello_world())
        .unwrap()
        .save()
        .unwrap();
    let edit = |actor: u64, ops: &[Operation]| {
        let doc = CrdtDocument::load(&bytes, ActorId(actor)).unwrap();
        tandem_editor_crdt::apply_editor_ops(&doc, ops).unwrap().unwrap()
    };
    let a = edit(1, &[Operation::remove_text(vec![0, 0], 0, "He")]);
    let b = edit(
        2,
        &[Operation::SetNode {
            path: vec![1],
            properties: NodeProperties {
                node_type: Some("heading".into()),
                data: None,
            },
        }],
    );
    let c = edit(3, &[Operation::RemoveNode { path: vec![0] }]);

    let abc = a.merge(&b).unwrap().merge(&c).unwrap();
    let cba = c.merge(&b).unwrap().merge(&a).unwrap();
    let bca = b.merge(&c.merge(&a).unwrap()).unwrap();
    assert_eq!(abc.value().unwrap(), cba.value().unwrap());
    assert_eq!(abc.value().unwrap(), bca.value().unwrap());
    assert_eq!(abc.merge(&abc).unwrap().value().unwrap(), abc.value().unwrap());
    assert_eq!(abc.merge(&a).unwrap().clock(), abc.clock());

    let document = abc.value().unwrap();
    assert_eq!(document.nodes.len(), 1);
    assert_eq!(document.nodes[0].as_element().unwrap().node_type, "heading");
}

#[test]
fn snapshot_round_trip_keeps_marks_and_data() {
    let mut value = hello();
    value
        .apply_batch(&[
            Operation::add_mark(vec![0, 0], 1, 3, "bold"),
            Operation::SetNode {
                path: vec![0],
                properties: NodeProperties {
                    node_type: None,
                    data: Some(
                        [("align".into(), serde_json::json!("center"))]
                            .into_iter()
                            .collect(),
                    ),
                },
            },
        ])
        .unwrap();
    let doc = CrdtDocument::from_value(ActorId(1), &value).unwrap();

    let binary = codec::decode_snapshot(&codec::encode_snapshot(&doc).unwrap(), ActorId(2)).unwrap();
    assert_eq!(binary.value().unwrap(), value.document);

    let text = codec::encode_snapshot_text(&doc).unwrap();
    let loaded = codec::decode_snapshot_text(&text, ActorId(3)).unwrap();
    assert_eq!(loaded.value().unwrap(), value.document);
    assert_eq!(loaded.clock(), doc.clock());

    let json = codec::value_to_json(&value).unwrap();
    let mut keys = tandem_editor_core::KeyGenerator::new("unused");
    assert_eq!(codec::value_from_json(&json, &mut keys).unwrap(), value);
}

#[test]
fn session_reconnect_catches_up() {
    let bytes = CrdtDocument::from_value(ActorId(100), &hello())
        .unwrap()
        .save()
        .unwrap();
    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    let mut a = ClientSession::load("doc", &bytes, ActorId(1), tx_a, NullView).unwrap();
    let mut b = ClientSession::load("doc", &bytes, ActorId(2), tx_b, NullView).unwrap();

    a.on_local_edit(&[Operation::insert_text(vec![0, 0], 5, "?")])
        .unwrap();
    b.on_local_edit(&[Operation::insert_text(vec![0, 0], 0, "¿")])
        .unwrap();
    a.toggle_online(true).unwrap();
    b.toggle_online(true).unwrap();

    // shuttle messages until both sides go quiet
    loop {
        let mut moved = false;
        while let Ok(envelope) = rx_a.try_recv() {
            if envelope.is_for(b.actor()) {
                b.on_remote_message(&envelope.message).unwrap();
            }
            moved = true;
        }
        while let Ok(envelope) = rx_b.try_recv() {
            if envelope.is_for(a.actor()) {
                a.on_remote_message(&envelope.message).unwrap();
            }
            moved = true;
        }
        if !moved {
            break;
        }
    }
    assert_eq!(a.value().document, b.value().document);
    assert_eq!(a.value().document.plain_text(), "¿Hello?");
    assert_eq!(a.clock().unwrap(), b.clock().unwrap());
}

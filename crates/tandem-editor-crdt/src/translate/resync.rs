//! Full rebuild of the editor value from the shared document.

use tandem_editor_core::Value;

use crate::{CrdtDocument, CrdtError};

/// Rebuild the editor value from the document.
///
/// The selection is discarded. Only fails for a corrupt document.
pub fn resync_from_document(doc: &CrdtDocument) -> Result<Value, CrdtError> {
    let document = doc.value()?;
    tracing::debug!(actor = %doc.actor(), blocks = document.nodes.len(), "full resync");
    Ok(Value::new(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActorId;
    use tandem_editor_core::{Document, Element, Node, Point, Selection, Text};

    #[test]
    fn test_resync_drops_selection() {
        let mut value = Value::new(Document::new(vec![Node::Block(Element::new(
            "p",
            "paragraph",
            vec![Node::Text(Text::plain("t", "abc"))],
        ))]));
        value.selection = Some(Selection::collapsed(Point::new(vec![0, 0], 1)));
        let doc = CrdtDocument::from_value(ActorId(1), &value).unwrap();
        let rebuilt = resync_from_document(&doc).unwrap();
        assert_eq!(rebuilt.document, value.document);
        assert!(rebuilt.selection.is_none());
    }
}

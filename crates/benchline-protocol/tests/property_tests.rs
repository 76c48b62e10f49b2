//! Property-based tests for reply framing.
//!
//! Serial reads split the byte stream at arbitrary points; whatever the split,
//! the framer must hand out the same lines in the same order.

use benchline_core::Element;
use benchline_protocol::{Command, Exchange, LineBuffer, ResponseFormat};
use proptest::prelude::*;

/// Strategy for reply lines as the analyzer sends them (no CR/LF inside).
fn reply_line() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9+.,:; -]{0,40}")
        .expect("Failed to create reply line regex strategy")
}

/// Strategy for elements the analyzer can select.
fn element() -> impl Strategy<Value = Element> {
    prop_oneof![(1u8..=3).prop_map(Element::Channel), Just(Element::Sigma)]
}

fn frame_all(wire: &[u8], chunk: usize) -> Vec<String> {
    let mut buffer = LineBuffer::new();
    let mut lines = Vec::new();
    for piece in wire.chunks(chunk) {
        buffer.feed(piece).unwrap();
        while let Some(line) = buffer.next_line() {
            lines.push(line);
        }
    }
    lines
}

proptest! {
    /// Property: chunk boundaries never change the framed lines.
    #[test]
    fn prop_framing_ignores_chunking(
        lines in prop::collection::vec(reply_line(), 1..20),
        chunk in 1usize..32,
        crlf in any::<bool>(),
    ) {
        let terminator = if crlf { "\r\n" } else { "\n" };
        let wire: String = lines.iter().map(|l| format!("{l}{terminator}")).collect();

        prop_assert_eq!(frame_all(wire.as_bytes(), chunk), lines);
    }

    /// Property: a trailing partial line stays buffered until its terminator.
    #[test]
    fn prop_partial_line_is_held(line in reply_line(), tail in "[A-Z]{1,10}") {
        let mut buffer = LineBuffer::new();
        buffer.feed(format!("{line}\n{tail}").as_bytes()).unwrap();

        prop_assert_eq!(buffer.next_line(), Some(line));
        prop_assert_eq!(buffer.next_line(), None);
        prop_assert_eq!(buffer.len(), tail.len());

        buffer.feed(b"\n").unwrap();
        prop_assert_eq!(buffer.next_line(), Some(tail));
    }

    /// Property: every setup command is sent as one line and confirmed with *OPC?.
    #[test]
    fn prop_setup_exchanges_are_single_confirmed_lines(element in element()) {
        for command in Command::setup_sequence(element, ResponseFormat::Ascii) {
            let exchange = Exchange::confirmed(&command);
            let wire = String::from_utf8(exchange.wire_bytes()).unwrap();

            prop_assert!(wire.ends_with(";*OPC?\n"));
            prop_assert_eq!(wire.matches('\n').count(), 1);
            prop_assert!(exchange.accepts("1"));
            prop_assert!(!exchange.accepts("0"));
        }
    }
}

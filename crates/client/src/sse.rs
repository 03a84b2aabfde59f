use coach_protocol::Fragment;

/// Incremental event-stream parser.
///
/// Feed it arbitrary byte chunks; it buffers until a blank line completes an
/// event block, skips comment lines, and JSON-decodes each `data:` payload
/// into a [`Fragment`]. The sequence is finite and non-restartable: after a
/// terminal fragment every further byte is discarded.
///
/// The parser is transport-independent on purpose so it can be exercised
/// with literal byte sequences.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    finished: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consumes one chunk and returns every fragment it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Fragment> {
        if self.finished {
            return Vec::new();
        }

        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut fragments = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            for line in block.lines() {
                if line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Fragment>(data) {
                    Ok(fragment) => {
                        let terminal = fragment.is_terminal();
                        fragments.push(fragment);
                        if terminal {
                            self.finished = true;
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(error = %error, "skipping undecodable stream payload");
                    }
                }
            }

            if self.finished {
                self.buffer.clear();
                break;
            }
        }

        fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_example_stream() {
        let mut parser = SseParser::new();
        let fragments = parser.push(
            b":ok\n\ndata: {\"delta\":\"Hi\"}\n\ndata: {\"delta\":\" there\"}\n\ndata: {\"done\":true}\n\n",
        );

        assert_eq!(
            fragments,
            vec![
                Fragment::delta("Hi"),
                Fragment::delta(" there"),
                Fragment::done(),
            ]
        );
        assert!(parser.is_finished());
    }

    #[test]
    fn reassembles_fragments_across_arbitrary_chunk_boundaries() {
        let bytes =
            b":ok\n\ndata: {\"delta\":\"Hola\"}\n\ndata: {\"delta\":\", que tal?\"}\n\ndata: {\"done\":true}\n\n";

        // Split the byte stream at every position; the fragment sequence
        // must come out identical regardless of chunking.
        for split in 0..bytes.len() {
            let mut parser = SseParser::new();
            let mut fragments = parser.push(&bytes[..split]);
            fragments.extend(parser.push(&bytes[split..]));

            assert_eq!(
                fragments,
                vec![
                    Fragment::delta("Hola"),
                    Fragment::delta(", que tal?"),
                    Fragment::done(),
                ],
                "split at {split}"
            );
        }
    }

    #[test]
    fn skips_comment_blocks_and_blank_payloads() {
        let mut parser = SseParser::new();
        let fragments =
            parser.push(b":ok\n\n: keep-alive\n\ndata:\n\ndata: {\"delta\":\"x\"}\n\n");
        assert_eq!(fragments, vec![Fragment::delta("x")]);
        assert!(!parser.is_finished());
    }

    #[test]
    fn error_fragment_is_terminal() {
        let mut parser = SseParser::new();
        let fragments = parser.push(b"data: {\"error\":\"upstream failed\"}\n\n");
        assert_eq!(fragments, vec![Fragment::error("upstream failed")]);
        assert!(parser.is_finished());
    }

    #[test]
    fn input_after_a_terminal_fragment_is_discarded() {
        let mut parser = SseParser::new();
        let fragments =
            parser.push(b"data: {\"done\":true}\n\ndata: {\"delta\":\"ghost\"}\n\n");
        assert_eq!(fragments, vec![Fragment::done()]);

        assert!(parser.push(b"data: {\"delta\":\"more\"}\n\n").is_empty());
    }

    #[test]
    fn undecodable_payloads_are_skipped() {
        let mut parser = SseParser::new();
        let fragments = parser.push(b"data: not json\n\ndata: {\"delta\":\"ok\"}\n\n");
        assert_eq!(fragments, vec![Fragment::delta("ok")]);
    }

    #[test]
    fn incomplete_trailing_block_waits_for_more_bytes() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"delta\":\"Hi\"}").is_empty());
        assert_eq!(parser.push(b"\n\n"), vec![Fragment::delta("Hi")]);
    }
}

//! Streaming, resumable update-stream parser
//!
//! Bytes may arrive in fragments of any size. Control lines are consumed
//! once their newline is buffered; a chunk payload is decoded once all of
//! its declared bytes are buffered. The result is independent of how the
//! stream was split.

use sbdb_core::constants::{COMPLETE_SIZE, DIGEST_TABLE_SUFFIX, PREFIX_SIZE};
use sbdb_core::{validate_table_name, ChunkType, TableUpdate};
use tracing::{debug, warn};

use crate::directive::{ChunkHeader, Directive};
use crate::error::{ParseError, Result};
use crate::payload::{decode_chunk, ChunkSpec};

/// Largest chunk payload accepted
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// A `u:` line: more update data to fetch for `table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedUpdate {
    pub table: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Reading newline-terminated directives
    Control,
    /// Waiting for `length` payload bytes of `spec`
    Chunk { spec: ChunkSpec, length: usize },
}

#[derive(Debug)]
pub struct ProtocolParser {
    state: ParserState,
    /// Unconsumed bytes; `pending[consumed..]` is live
    pending: Vec<u8>,
    consumed: usize,
    current_table: Option<String>,
    table_updates: Vec<TableUpdate>,
    forwards: Vec<ForwardedUpdate>,
    update_wait: u32,
    reset_requested: bool,
    status: Option<ParseError>,
}

impl Default for ProtocolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Control,
            pending: Vec::new(),
            consumed: 0,
            current_table: None,
            table_updates: Vec::new(),
            forwards: Vec::new(),
            update_wait: 0,
            reset_requested: false,
            status: None,
        }
    }

    /// Reset all session state, including a poisoned status
    pub fn begin(&mut self) {
        *self = Self::new();
    }

    /// Select the table later chunk headers apply to. Does not create a
    /// `TableUpdate` by itself.
    pub fn set_current_table(&mut self, table: &str) -> Result<()> {
        validate_table_name(table).map_err(|_| ParseError::InvalidTable(table.to_string()))?;
        self.current_table = Some(table.to_string());
        Ok(())
    }

    pub fn current_table(&self) -> Option<&str> {
        self.current_table.as_deref()
    }

    /// First error of this session, if any
    pub fn status(&self) -> std::result::Result<(), ParseError> {
        match &self.status {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Feed more bytes. After a failure the session is poisoned: further
    /// calls change nothing and return the recorded error until `begin()`.
    pub fn append_stream(&mut self, data: &[u8]) -> Result<()> {
        self.status()?;

        self.pending.extend_from_slice(data);
        let result = self.process();
        self.compact();

        if let Err(err) = &result {
            warn!(error = %err, table = ?self.current_table, "Update stream parse failed");
            self.status = Some(err.clone());
            self.pending.clear();
            self.consumed = 0;
        }
        result
    }

    /// Called at the end of a stream: buffered leftovers mean truncation
    pub fn finish_stream(&mut self) -> Result<()> {
        self.status()?;
        let leftover = &self.pending[self.consumed..];
        let err = match self.state {
            ParserState::Chunk { spec, length } => Some(ParseError::TruncatedChunk {
                chunk: spec.number,
                missing: length - leftover.len(),
            }),
            ParserState::Control if !leftover.iter().all(u8::is_ascii_whitespace) => Some(
                ParseError::UnterminatedLine(String::from_utf8_lossy(leftover).into_owned()),
            ),
            ParserState::Control => None,
        };
        match err {
            Some(err) => {
                warn!(error = %err, "Update stream ended early");
                self.status = Some(err.clone());
                Err(err)
            }
            None => {
                self.pending.clear();
                self.consumed = 0;
                Ok(())
            }
        }
    }

    fn process(&mut self) -> Result<()> {
        loop {
            let progressed = match self.state {
                ParserState::Control => self.process_control()?,
                ParserState::Chunk { spec, length } => self.process_chunk(spec, length)?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn compact(&mut self) {
        if self.consumed > 0 {
            self.pending.drain(..self.consumed);
            self.consumed = 0;
        }
    }

    /// Consume one buffered line, if a whole one is available
    fn process_control(&mut self) -> Result<bool> {
        let live = &self.pending[self.consumed..];
        let Some(newline) = live.iter().position(|&b| b == b'\n') else {
            return Ok(false);
        };
        let raw = &live[..newline];
        let line = String::from_utf8_lossy(raw)
            .trim_end_matches('\r')
            .to_string();
        self.consumed += newline + 1;

        if line.is_empty() {
            return Ok(true);
        }
        self.handle_directive(Directive::parse(&line)?)?;
        Ok(true)
    }

    fn handle_directive(&mut self, directive: Directive) -> Result<()> {
        match directive {
            Directive::UpdateWait(secs) => self.update_wait = secs,
            Directive::Table(table) => self.set_current_table(&table)?,
            Directive::Forward(url) => {
                let table = self.require_table("u")?;
                self.forwards.push(ForwardedUpdate { table, url });
            }
            Directive::ExpireAdd(chunks) => {
                let table = self.require_table("ad")?;
                self.table_update(&table).new_add_expiration(&chunks);
            }
            Directive::ExpireSub(chunks) => {
                let table = self.require_table("sd")?;
                self.table_update(&table).new_sub_expiration(&chunks);
            }
            Directive::Reset => self.reset_requested = true,
            Directive::Chunk(header) => {
                let spec = self.resolve_chunk(header)?;
                self.state = ParserState::Chunk {
                    spec,
                    length: header.length,
                };
            }
            Directive::Ignored(line) => debug!(line = %line, "Ignoring control line"),
        }
        Ok(())
    }

    fn require_table(&self, directive: &str) -> Result<String> {
        self.current_table.clone().ok_or_else(|| ParseError::NoTable {
            directive: directive.to_string(),
        })
    }

    /// Validate a chunk header against the selected table
    fn resolve_chunk(&self, header: ChunkHeader) -> Result<ChunkSpec> {
        let table = self.require_table(if header.add { "a" } else { "s" })?;

        if header.hash_size != PREFIX_SIZE && header.hash_size != COMPLETE_SIZE {
            return Err(ParseError::UnsupportedHashSize {
                chunk: header.number,
                size: header.hash_size,
            });
        }
        if header.length > MAX_CHUNK_SIZE {
            return Err(ParseError::ChunkTooLarge {
                chunk: header.number,
                length: header.length,
                max: MAX_CHUNK_SIZE,
            });
        }

        let digest = table.ends_with(DIGEST_TABLE_SUFFIX);
        if digest && header.hash_size != COMPLETE_SIZE {
            return Err(ParseError::UnsupportedHashSize {
                chunk: header.number,
                size: header.hash_size,
            });
        }
        let kind = match (header.add, digest) {
            (true, false) => ChunkType::Add,
            (false, false) => ChunkType::Sub,
            (true, true) => ChunkType::AddDigest,
            (false, true) => ChunkType::SubDigest,
        };

        Ok(ChunkSpec {
            kind,
            number: header.number,
            hash_size: header.hash_size,
        })
    }

    fn process_chunk(&mut self, spec: ChunkSpec, length: usize) -> Result<bool> {
        if self.pending.len() - self.consumed < length {
            return Ok(false);
        }
        let start = self.consumed;
        self.consumed += length;

        let table = self.require_table("chunk")?;
        // split the borrow: payload lives in `pending`, the update in `table_updates`
        let payload = std::mem::take(&mut self.pending);
        let decoded = decode_chunk(spec, &payload[start..start + length], self.table_update(&table));
        self.pending = payload;
        decoded?;

        debug!(
            table = %table,
            chunk = spec.number,
            kind = %spec.kind,
            bytes = length,
            "Decoded chunk"
        );
        self.state = ParserState::Control;
        Ok(true)
    }

    /// The accumulator for `table`, created on first use
    pub fn table_update(&mut self, table: &str) -> &mut TableUpdate {
        let idx = match self
            .table_updates
            .iter()
            .position(|u| u.table_name() == table)
        {
            Some(idx) => idx,
            None => {
                self.table_updates.push(TableUpdate::new(table));
                self.table_updates.len() - 1
            }
        };
        &mut self.table_updates[idx]
    }

    pub fn table_updates(&self) -> &[TableUpdate] {
        &self.table_updates
    }

    /// Move the accumulated updates out; the parser keeps none afterwards
    pub fn forget_table_updates(&mut self) -> Vec<TableUpdate> {
        std::mem::take(&mut self.table_updates)
    }

    pub fn forwards(&self) -> &[ForwardedUpdate] {
        &self.forwards
    }

    pub fn update_wait(&self) -> u32 {
        self.update_wait
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbdb_core::Prefix;

    fn stream() -> Vec<u8> {
        let mut s = b"n:1800\ni:test-phish-simple\nad:9\na:1:4:5\nabcd\x00".to_vec();
        s.extend_from_slice(b"a:2:4:13\nwxyz\x02aaaabbbb");
        s.extend_from_slice(b"s:3:4:9\nabcd\x00");
        s.extend_from_slice(&1u32.to_be_bytes());
        s.extend_from_slice(b"u:redirect.example/next\ni:test-malware-simple\nsd:2-4\n");
        s
    }

    fn parse_whole(data: &[u8]) -> ProtocolParser {
        let mut parser = ProtocolParser::new();
        parser.append_stream(data).unwrap();
        parser.finish_stream().unwrap();
        parser
    }

    #[test]
    fn test_full_stream() {
        let parser = parse_whole(&stream());
        assert_eq!(parser.update_wait(), 1800);
        assert!(!parser.reset_requested());

        let updates = parser.table_updates();
        assert_eq!(updates.len(), 2);
        let phish = &updates[0];
        assert_eq!(phish.table_name(), "test-phish-simple");
        assert_eq!(phish.add_chunks.to_string(), "1-2");
        assert_eq!(phish.sub_chunks.to_string(), "3");
        assert_eq!(phish.add_expirations.to_string(), "9");
        assert_eq!(phish.add_prefixes.len(), 3);
        assert_eq!(phish.sub_prefixes[0].prefix, Prefix(*b"abcd"));
        assert_eq!(phish.sub_prefixes[0].add_chunk, 1);

        let malware = &updates[1];
        assert_eq!(malware.table_name(), "test-malware-simple");
        assert_eq!(malware.sub_expirations.to_string(), "2-4");

        assert_eq!(
            parser.forwards(),
            &[ForwardedUpdate {
                table: "test-phish-simple".into(),
                url: "redirect.example/next".into()
            }]
        );
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let data = stream();
        let whole = parse_whole(&data);

        let mut split = ProtocolParser::new();
        for b in &data {
            split.append_stream(std::slice::from_ref(b)).unwrap();
        }
        split.finish_stream().unwrap();

        assert_eq!(split.table_updates(), whole.table_updates());
        assert_eq!(split.forwards(), whole.forwards());
        assert_eq!(split.update_wait(), whole.update_wait());
    }

    #[test]
    fn test_bad_hash_size_poisons_session() {
        let mut parser = ProtocolParser::new();
        let err = parser.append_stream(b"i:test-phish\na:1:5:8\n").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedHashSize { size: 5, .. }));
        assert!(parser.status().is_err());

        // poisoned: nothing more is accepted
        assert!(parser.append_stream(b"i:other\n").is_err());
        assert_eq!(parser.current_table(), Some("test-phish"));

        parser.begin();
        assert!(parser.status().is_ok());
        parser.append_stream(b"i:other\n").unwrap();
        assert_eq!(parser.current_table(), Some("other"));
    }

    #[test]
    fn test_chunk_without_table() {
        let mut parser = ProtocolParser::new();
        assert!(matches!(
            parser.append_stream(b"a:1:4:5\n"),
            Err(ParseError::NoTable { .. })
        ));
    }

    #[test]
    fn test_oversized_chunk() {
        let mut parser = ProtocolParser::new();
        let line = format!("i:t\na:1:4:{}\n", MAX_CHUNK_SIZE + 1);
        assert!(matches!(
            parser.append_stream(line.as_bytes()),
            Err(ParseError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_digest_table_requires_full_hashes() {
        let mut parser = ProtocolParser::new();
        assert!(parser
            .append_stream(b"i:test-block-digest256\na:1:4:4\n")
            .is_err());

        parser.begin();
        parser
            .append_stream(b"i:test-block-digest256\ns:7:32:0\n")
            .unwrap();
        parser.finish_stream().unwrap();
        let update = &parser.table_updates()[0];
        assert!(update.sub_chunks.contains(7));
    }

    #[test]
    fn test_empty_add_chunk_registers_number() {
        let parser = parse_whole(b"i:t\na:4:4:0\na:5:4:5\nabcd\x00s:6:4:0\n");
        let update = &parser.table_updates()[0];
        assert_eq!(update.add_chunks.to_string(), "4-5");
        assert_eq!(update.sub_chunks.to_string(), "6");
        assert_eq!(update.add_prefixes.len(), 1);
        assert_eq!(update.add_prefixes[0].chunk, 5);
        assert!(update.sub_prefixes.is_empty());
    }

    #[test]
    fn test_truncated_chunk_reported_at_finish() {
        let mut parser = ProtocolParser::new();
        parser.append_stream(b"i:t\na:1:4:10\nabcd\x00").unwrap();
        assert!(matches!(
            parser.finish_stream(),
            Err(ParseError::TruncatedChunk { chunk: 1, missing: 5 })
        ));
        assert!(parser.status().is_err());
    }

    #[test]
    fn test_reset_and_crlf() {
        let parser = parse_whole(b"n:60\r\nr:pleasereset\r\n");
        assert!(parser.reset_requested());
        assert_eq!(parser.update_wait(), 60);
    }

    #[test]
    fn test_forget_moves_updates_out() {
        let mut parser = parse_whole(&stream());
        let taken = parser.forget_table_updates();
        assert_eq!(taken.len(), 2);
        assert!(parser.table_updates().is_empty());
    }
}

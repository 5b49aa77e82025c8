//! Control-line grammar of the update stream
//!
//! ```text
//! n:<seconds>                      next update wait
//! i:<table>                        select table
//! u:<url>                          forwarded update for the selected table
//! ad:<chunks> / sd:<chunks>        expire add / sub chunks ("1-3,5")
//! r:pleasereset                    drop the whole database
//! a:<num>:<hashsize>:<length>      add chunk header, payload follows
//! s:<num>:<hashsize>:<length>      sub chunk header, payload follows
//! ```

use sbdb_core::ChunkSet;

use crate::error::{ParseError, Result};

/// Header of a chunk whose binary payload follows the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub add: bool,
    pub number: u32,
    pub hash_size: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    UpdateWait(u32),
    Table(String),
    Forward(String),
    ExpireAdd(ChunkSet),
    ExpireSub(ChunkSet),
    Reset,
    Chunk(ChunkHeader),
    /// Lines this client has no use for (MACs, rekey requests, ...)
    Ignored(String),
}

impl Directive {
    /// Parse one control line without its terminating newline
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || ParseError::MalformedLine(line.to_string());
        let (tag, value) = line.split_once(':').ok_or_else(malformed)?;

        match tag {
            "n" => value
                .trim()
                .parse::<u32>()
                .map(Directive::UpdateWait)
                .map_err(|_| malformed()),
            "i" => {
                let table = value.trim();
                if table.is_empty() {
                    return Err(malformed());
                }
                Ok(Directive::Table(table.to_string()))
            }
            "u" => {
                if value.is_empty() {
                    return Err(malformed());
                }
                Ok(Directive::Forward(value.to_string()))
            }
            "ad" | "sd" => {
                let chunks = value
                    .parse::<ChunkSet>()
                    .map_err(|_| ParseError::InvalidChunkList { list: value.to_string() })?;
                Ok(if tag == "ad" {
                    Directive::ExpireAdd(chunks)
                } else {
                    Directive::ExpireSub(chunks)
                })
            }
            "r" => {
                if value == "pleasereset" {
                    Ok(Directive::Reset)
                } else {
                    Err(malformed())
                }
            }
            "a" | "s" => {
                let mut fields = value.split(':');
                let mut next = || -> Result<usize> {
                    fields
                        .next()
                        .and_then(|f| f.trim().parse::<usize>().ok())
                        .ok_or_else(malformed)
                };
                let number = next()?;
                let hash_size = next()?;
                let length = next()?;
                if fields.next().is_some() {
                    return Err(malformed());
                }
                let number = u32::try_from(number).map_err(|_| malformed())?;
                Ok(Directive::Chunk(ChunkHeader {
                    add: tag == "a",
                    number,
                    hash_size,
                    length,
                }))
            }
            _ => Ok(Directive::Ignored(line.to_string())),
        }
    }
}

//! RouterOS API wire format: length-prefixed words grouped into sentences.
//!
//! A word is a length prefix (1–5 bytes, see [`encode_length`]) followed by
//! that many bytes of UTF-8. A sentence is a sequence of words terminated by
//! a zero-length word. Replies start with a `!re`/`!done`/`!trap`/`!fatal`
//! word; attribute words are `=key=value`.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Upper bound on a single word; anything larger is a corrupt stream, not a
/// plausible access-list reply.
const MAX_WORD_LEN: u32 = 4 * 1024 * 1024;

// ─── Length prefix ───────────────────────────────────────────────────────────

/// Append the RouterOS variable-length encoding of `len` to `buf`.
///
/// | range              | bytes | leading bits |
/// |--------------------|-------|--------------|
/// | < 0x80             | 1     | `0xxxxxxx`   |
/// | < 0x4000           | 2     | `10xxxxxx`   |
/// | < 0x20_0000        | 3     | `110xxxxx`   |
/// | < 0x1000_0000      | 4     | `1110xxxx`   |
/// | otherwise          | 5     | `0xF0` + u32 |
pub fn encode_length(len: u32, buf: &mut Vec<u8>) {
  if len < 0x80 {
    buf.push(len as u8);
  } else if len < 0x4000 {
    let v = len | 0x8000;
    buf.extend_from_slice(&[(v >> 8) as u8, v as u8]);
  } else if len < 0x20_0000 {
    let v = len | 0xC0_0000;
    buf.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
  } else if len < 0x1000_0000 {
    let v = len | 0xE000_0000;
    buf.extend_from_slice(&[
      (v >> 24) as u8,
      (v >> 16) as u8,
      (v >> 8) as u8,
      v as u8,
    ]);
  } else {
    buf.push(0xF0);
    buf.extend_from_slice(&len.to_be_bytes());
  }
}

/// Read a length prefix.
pub async fn read_length<R>(reader: &mut R) -> Result<u32>
where
  R: AsyncRead + Unpin,
{
  let first = reader.read_u8().await?;

  let (extra, base) = match first {
    b if b & 0x80 == 0x00 => (0usize, b as u32),
    b if b & 0xC0 == 0x80 => (1, (b & 0x3F) as u32),
    b if b & 0xE0 == 0xC0 => (2, (b & 0x1F) as u32),
    b if b & 0xF0 == 0xE0 => (3, (b & 0x0F) as u32),
    0xF0 => (4, 0),
    b => {
      return Err(Error::Protocol(format!("invalid length byte 0x{b:02x}")));
    }
  };

  let mut len = base;
  for _ in 0..extra {
    len = (len << 8) | reader.read_u8().await? as u32;
  }
  Ok(len)
}

// ─── Words and sentences ─────────────────────────────────────────────────────

/// Read one word; `None` is the zero-length sentence terminator.
pub async fn read_word<R>(reader: &mut R) -> Result<Option<String>>
where
  R: AsyncRead + Unpin,
{
  let len = read_length(reader).await?;
  if len == 0 {
    return Ok(None);
  }
  if len > MAX_WORD_LEN {
    return Err(Error::Protocol(format!("word of {len} bytes")));
  }

  let mut buf = vec![0u8; len as usize];
  reader.read_exact(&mut buf).await?;
  String::from_utf8(buf)
    .map(Some)
    .map_err(|_| Error::Protocol("word is not valid UTF-8".to_string()))
}

/// Read a full sentence (all words up to the terminator).
///
/// An empty sentence is legal keep-alive noise in the protocol and is
/// returned as an empty vec.
pub async fn read_sentence<R>(reader: &mut R) -> Result<Vec<String>>
where
  R: AsyncRead + Unpin,
{
  let mut words = Vec::new();
  while let Some(word) = read_word(reader).await? {
    words.push(word);
  }
  Ok(words)
}

/// Write one sentence: every word length-prefixed, then the terminator.
/// Buffered into a single write so a sentence is never half-sent.
pub async fn write_sentence<W, I, S>(writer: &mut W, words: I) -> Result<()>
where
  W: AsyncWrite + Unpin,
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut buf = Vec::new();
  for word in words {
    let bytes = word.as_ref().as_bytes();
    encode_length(bytes.len() as u32, &mut buf);
    buf.extend_from_slice(bytes);
  }
  buf.push(0);

  writer.write_all(&buf).await?;
  writer.flush().await?;
  Ok(())
}

// ─── Replies ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
  /// One data record of a command's result set.
  Re,
  /// End of the result set.
  Done,
  /// Explicit rejection; details in the `message` attribute.
  Trap,
  /// The router is closing the connection.
  Fatal,
}

/// One parsed reply sentence.
#[derive(Debug, Clone)]
pub struct Reply {
  pub kind:       ReplyKind,
  pub attributes: HashMap<String, String>,
}

impl Reply {
  /// Parse a raw sentence. Attribute words are `=key=value`; other words
  /// (API tags, the `!fatal` reason) are handled per kind.
  pub fn parse(words: Vec<String>) -> Result<Self> {
    let mut iter = words.into_iter();
    let head = iter
      .next()
      .ok_or_else(|| Error::Protocol("empty reply sentence".to_string()))?;

    let kind = match head.as_str() {
      "!re" => ReplyKind::Re,
      "!done" => ReplyKind::Done,
      "!trap" => ReplyKind::Trap,
      "!fatal" => ReplyKind::Fatal,
      other => {
        return Err(Error::Protocol(format!("unknown reply word {other:?}")));
      }
    };

    let mut attributes = HashMap::new();
    for word in iter {
      if let Some(rest) = word.strip_prefix('=') {
        if let Some((key, value)) = rest.split_once('=') {
          attributes.insert(key.to_string(), value.to_string());
        }
      } else if kind == ReplyKind::Fatal {
        // The fatal reason arrives as a bare word.
        attributes.insert("message".to_string(), word);
      }
    }

    Ok(Self { kind, attributes })
  }

  pub fn attr(&self, key: &str) -> Option<&str> {
    self.attributes.get(key).map(String::as_str)
  }
}

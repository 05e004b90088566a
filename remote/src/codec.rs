//! Whitespace-delimited tokens over a byte stream.
//!
//! Every message exchanged with an agent (and every control command) is a sequence of tokens
//! separated by ASCII whitespace, optionally followed by raw payload bytes. Readers here consume
//! leading whitespace, the token itself, and exactly one trailing delimiter byte, which leaves
//! the stream positioned at the first payload byte.
//!
//! All readers suspend until a delimiter or end-of-stream is seen; there is no partial mode.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Default bound for a single token (file names, paths, commands).
pub const MAX_TOKEN_LEN: usize = 1024;

/// `i64::MIN` has 19 digits plus a sign.
const MAX_NUMBER_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("token exceeds {max} bytes")]
    TokenTooLong { max: usize },

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("unknown request {0:?}")]
    UnknownRequest(String),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<WireError> for common::Error {
    fn from(error: WireError) -> Self {
        match error {
            WireError::Io(source) => common::Error::io("connection failed", source),
            other => common::Error::Protocol(other.to_string()),
        }
    }
}

/// Raw token bytes plus whether a delimiter (rather than end-of-stream) ended it.
struct RawToken {
    bytes: Vec<u8>,
    terminated: bool,
}

async fn peek_byte<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<u8>> {
    let buf = reader.fill_buf().await?;
    Ok(buf.first().copied())
}

/// Returns `None` if the stream ends before any token byte.
async fn read_raw<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<RawToken>, WireError> {
    loop {
        match peek_byte(reader).await? {
            None => return Ok(None),
            Some(byte) if byte.is_ascii_whitespace() => reader.consume(1),
            Some(_) => break,
        }
    }
    let mut bytes = Vec::new();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(Some(RawToken {
                bytes,
                terminated: false,
            }));
        }
        match buf.iter().position(u8::is_ascii_whitespace) {
            Some(end) => {
                if bytes.len() + end > max_len {
                    return Err(WireError::TokenTooLong { max: max_len });
                }
                bytes.extend_from_slice(&buf[..end]);
                // consume the delimiter as well
                reader.consume(end + 1);
                return Ok(Some(RawToken {
                    bytes,
                    terminated: true,
                }));
            }
            None => {
                let len = buf.len();
                if bytes.len() + len > max_len {
                    return Err(WireError::TokenTooLong { max: max_len });
                }
                bytes.extend_from_slice(buf);
                reader.consume(len);
            }
        }
    }
}

/// Reads the next whitespace-delimited token.
///
/// Returns `Ok(None)` on a clean end-of-stream before the token started. A token cut short by
/// end-of-stream is still returned.
pub async fn read_token<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<String>, WireError> {
    Ok(read_raw(reader, max_len)
        .await?
        .map(|token| String::from_utf8_lossy(&token.bytes).into_owned()))
}

/// Like [`read_token`] but treats end-of-stream as an error.
pub async fn expect_token<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<String, WireError> {
    read_token(reader, max_len)
        .await?
        .ok_or(WireError::UnexpectedEof)
}

fn parse_number(bytes: &[u8]) -> Option<i64> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return None;
        }
        let digit = i64::from(byte - b'0');
        value = value.checked_mul(10)?;
        value = if negative {
            value.checked_sub(digit)?
        } else {
            value.checked_add(digit)?
        };
    }
    Some(value)
}

/// Reads a signed decimal number token.
///
/// Anything other than an optional `-` followed by digits, or a number not followed by a
/// delimiter, is [`WireError::InvalidNumber`]. A wrong value is never returned.
pub async fn read_number<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<i64, WireError> {
    let token = match read_raw(reader, MAX_NUMBER_LEN).await {
        Ok(Some(token)) => token,
        Ok(None) => return Err(WireError::UnexpectedEof),
        Err(WireError::TokenTooLong { .. }) => {
            return Err(WireError::InvalidNumber(format!(
                "more than {MAX_NUMBER_LEN} bytes"
            )));
        }
        Err(error) => return Err(error),
    };
    let text = String::from_utf8_lossy(&token.bytes).into_owned();
    if !token.terminated {
        return Err(WireError::InvalidNumber(text));
    }
    parse_number(&token.bytes).ok_or(WireError::InvalidNumber(text))
}

/// Reads free-form error text following a `-1` reply.
///
/// The text has no length prefix, so reading stops at the first newline, at end-of-stream, or
/// after `max_len` bytes, whichever comes first. This never waits for more than one line.
pub async fn read_error_text<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<String, WireError> {
    let mut buf = Vec::new();
    let mut limited = reader.take(max_len as u64);
    limited.read_until(b'\n', &mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &'static [u8]) -> tokio::io::BufReader<&'static [u8]> {
        tokio::io::BufReader::new(data)
    }

    #[tokio::test]
    async fn tokens_skip_leading_whitespace() -> anyhow::Result<()> {
        let mut input = reader(b"  \n\tLIST  docs\nnext");
        assert_eq!(read_token(&mut input, 16).await?.as_deref(), Some("LIST"));
        assert_eq!(read_token(&mut input, 16).await?.as_deref(), Some("docs"));
        assert_eq!(read_token(&mut input, 16).await?.as_deref(), Some("next"));
        assert_eq!(read_token(&mut input, 16).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn token_consumes_exactly_one_delimiter() -> anyhow::Result<()> {
        let mut input = reader(b"PUSH 3  abc");
        assert_eq!(expect_token(&mut input, 16).await?, "PUSH");
        assert_eq!(read_number(&mut input).await?, 3);
        let mut rest = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut input, &mut rest).await?;
        assert_eq!(rest, " abc");
        Ok(())
    }

    #[tokio::test]
    async fn oversized_token_is_rejected() {
        let mut input = reader(b"abcdefgh ");
        assert!(matches!(
            read_token(&mut input, 4).await,
            Err(WireError::TokenTooLong { max: 4 })
        ));
    }

    #[tokio::test]
    async fn token_at_exact_limit_is_accepted() -> anyhow::Result<()> {
        let mut input = reader(b"abcd ");
        assert_eq!(read_token(&mut input, 4).await?.as_deref(), Some("abcd"));
        Ok(())
    }

    #[tokio::test]
    async fn numbers_accept_optional_sign() -> anyhow::Result<()> {
        let mut input = reader(b"42 -1\n 0 ");
        assert_eq!(read_number(&mut input).await?, 42);
        assert_eq!(read_number(&mut input).await?, -1);
        assert_eq!(read_number(&mut input).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn non_digit_is_invalid_number() {
        for data in [&b"12a "[..], &b"- "[..], &b"+5 "[..], &b"--1 "[..], &b"x "[..]] {
            let mut input = tokio::io::BufReader::new(data);
            assert!(
                matches!(
                    read_number(&mut input).await,
                    Err(WireError::InvalidNumber(_))
                ),
                "{data:?} should be invalid"
            );
        }
    }

    #[tokio::test]
    async fn number_without_delimiter_is_invalid() {
        let mut input = reader(b"123");
        assert!(matches!(
            read_number(&mut input).await,
            Err(WireError::InvalidNumber(_))
        ));
    }

    #[tokio::test]
    async fn number_overflow_is_invalid() {
        let mut input = reader(b"99999999999999999999 ");
        assert!(matches!(
            read_number(&mut input).await,
            Err(WireError::InvalidNumber(_))
        ));
    }

    #[tokio::test]
    async fn number_on_empty_stream_is_eof() {
        let mut input = reader(b"   ");
        assert!(matches!(
            read_number(&mut input).await,
            Err(WireError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn error_text_stops_at_newline_or_cap() -> anyhow::Result<()> {
        let mut input = reader(b"No such file or directory\nPUSH");
        assert_eq!(
            read_error_text(&mut input, 1024).await?,
            "No such file or directory"
        );
        let mut input = reader(b"0123456789");
        assert_eq!(read_error_text(&mut input, 4).await?, "0123");
        Ok(())
    }
}

//! The per-connection preamble and per-message header.
//!
//! ```text
//! | Option{MagicNumber, CodecType, ...} | Header1 | Body1 | Header2 | Body2 | ...
//! | <---------- fixed JSON encoding --------------> | <---- codec-negotiated ---->
//! ```
//!
//! `Option` is sent exactly once, as JSON, before any `Header`. Everything
//! after it is framed and encoded by the codec named in `codec_type`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecKind;
use crate::error::Result;

/// Fixed value every connection must present before any `Header`.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// The connection-level preamble, negotiated once per connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: String,
    #[serde(with = "duration_nanos")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_nanos")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecKind::Gob.name().to_string(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec_type = codec.name().to_string();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

/// Per-message metadata, sent ahead of every request/response body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

/// Write the JSON preamble, length-prefixed the same way every subsequent
/// frame is, directly on the raw stream — before any [`crate::codec::Codec`]
/// (and therefore any buffering it might someday introduce) is constructed.
pub async fn write_options<W: AsyncWrite + Unpin>(stream: &mut W, opt: &Options) -> Result<()> {
    let bytes = serde_json::to_vec(opt)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Read the JSON preamble off the raw stream. See [`write_options`].
pub async fn read_options<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Options> {
    let len = stream.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn options_round_trip_over_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let opt = Options::default()
            .with_codec(CodecKind::Json)
            .with_connect_timeout(Duration::from_millis(250));

        write_options(&mut a, &opt).await.unwrap();
        let got = read_options(&mut b).await.unwrap();

        assert_eq!(got.magic_number, opt.magic_number);
        assert_eq!(got.codec_type, opt.codec_type);
        assert_eq!(got.connect_timeout, opt.connect_timeout);
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.as_nanos() as i64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}

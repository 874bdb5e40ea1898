//! Payload compression, decompression and framing.

use std::borrow::Cow;
use std::io::{self, Read, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{read::DeflateDecoder, write::ZlibEncoder, Compression};
use tracing::instrument;

use crate::types::OFFSET_ALIGNMENT;

/// Length of the zlib header that precedes the deflate stream of a compressed payload
pub const CODEC_STUB_LENGTH: u64 = 2;

/// Identifies how a file payload is stored inside the bigfile
///
/// Files added through [`crate::write::BigFileWriter`] choose their method via [`crate::write::FileOptions`],
/// the pack engine picks it from [`crate::options::PackOptions::compress`].
#[derive(BinRead, BinWrite, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[brw(repr=u8)]
pub enum CompressionMethod {
    /// Stores the data as it is
    #[default]
    None = 0,

    /// Compress the data using Zlib
    Zlib = 1,
}

impl CompressionMethod {
    /// Whether the payload is compressed
    pub fn is_compressed(self) -> bool {
        self == CompressionMethod::Zlib
    }
}

impl From<bool> for CompressionMethod {
    fn from(compress: bool) -> Self {
        if compress {
            CompressionMethod::Zlib
        } else {
            CompressionMethod::None
        }
    }
}

/// Inflates the stored form of one compressed payload
pub(crate) struct Inflater<'a, R: Read> {
    inner: DeflateDecoder<io::Take<&'a mut R>>,
}

impl<'a, R: Read> Inflater<'a, R> {
    /// Wrap a reader positioned at the start of a zlib stream of `limit` stored bytes.
    ///
    /// The codec stub is consumed here and the rest is inflated as raw deflate.
    #[instrument(level = "trace", skip(reader))]
    pub fn new(reader: &'a mut R, limit: u64) -> io::Result<Self> {
        let mut stub = [0u8; CODEC_STUB_LENGTH as usize];
        reader.read_exact(&mut stub)?;
        let remaining = limit.saturating_sub(CODEC_STUB_LENGTH);
        Ok(Self {
            inner: DeflateDecoder::new(reader.by_ref().take(remaining)),
        })
    }
}

impl<R: Read> Read for Inflater<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Number of zero bytes needed to bring `len` to the next offset boundary
pub(crate) fn padding_for(len: u64) -> u64 {
    (OFFSET_ALIGNMENT - len % OFFSET_ALIGNMENT) % OFFSET_ALIGNMENT
}

/// Write one payload frame for `body` and pad it to the offset alignment.
///
/// `stored` must already be in its stored form: the raw body for [`CompressionMethod::None`], the zlib stream
/// for [`CompressionMethod::Zlib`]. Returns the number of bytes written, padding included.
pub(crate) fn write_frame<W: Write>(
    out: &mut W,
    stored: &[u8],
    uncompressed_len: u32,
    compression: CompressionMethod,
) -> io::Result<u64> {
    let mut written = 0u64;
    match compression {
        CompressionMethod::None => {
            out.write_u32::<LittleEndian>(stored.len() as u32)?;
            written += 4;
        }
        CompressionMethod::Zlib => {
            out.write_u32::<LittleEndian>(stored.len() as u32)?;
            out.write_u32::<LittleEndian>(uncompressed_len)?;
            written += 8;
        }
    }
    out.write_all(stored)?;
    written += stored.len() as u64;

    let padding = padding_for(written);
    out.write_all(&[0u8; OFFSET_ALIGNMENT as usize][..padding as usize])?;

    Ok(written + padding)
}

/// Bring a body into its stored form
pub(crate) fn encode_stored(
    body: &[u8],
    compression: CompressionMethod,
) -> io::Result<Cow<'_, [u8]>> {
    match compression {
        CompressionMethod::None => Ok(Cow::Borrowed(body)),
        CompressionMethod::Zlib => {
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
            encoder.write_all(body)?;
            Ok(Cow::Owned(encoder.finish()?))
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Read};

    use pretty_assertions::assert_eq;

    use crate::compression::{encode_stored, padding_for, write_frame, CompressionMethod, Inflater};

    #[test]
    fn padding_reaches_alignment() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 7);
        assert_eq!(padding_for(8), 0);
        assert_eq!(padding_for(15), 1);
    }

    #[test]
    fn uncompressed_frame_layout() -> std::io::Result<()> {
        let mut out = Vec::new();
        let written = write_frame(&mut out, b"Hello", 5, CompressionMethod::None)?;

        #[rustfmt::skip]
        let expected = vec![
            0x05, 0x00, 0x00, 0x00,
            0x48, 0x65, 0x6C, 0x6C, 0x6F,
            0x00, 0x00, 0x00,
        ];
        assert_eq!(written, 12);
        assert_eq!(out, expected);

        Ok(())
    }

    #[test]
    fn inflate_skips_codec_stub() -> std::io::Result<()> {
        #[rustfmt::skip]
        let stored = [
            0x78, 0x9C, 0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0x08, 0xCF, 0x2F, 0xCA, 0x49, 0x01,
            0x00, 0x18, 0x0B, 0x04, 0x1D,
        ];

        let mut cursor = Cursor::new(stored);
        let mut reader = Inflater::new(&mut cursor, stored.len() as u64)?;
        let mut actual = vec![0u8; 11];
        reader.read_exact(&mut actual)?;

        assert_eq!(actual, b"Hello World");

        Ok(())
    }

    #[test]
    fn encoded_stream_starts_with_stub() -> std::io::Result<()> {
        let stored = encode_stored(b"Hello World", CompressionMethod::Zlib)?.into_owned();
        assert_eq!(&stored[..2], &[0x78, 0x9C]);

        let mut cursor = Cursor::new(&stored);
        let mut reader = Inflater::new(&mut cursor, stored.len() as u64)?;
        let mut actual = Vec::new();
        reader.read_to_end(&mut actual)?;
        assert_eq!(actual, b"Hello World");

        Ok(())
    }

    #[test]
    fn uncompressed_bodies_are_stored_as_is() -> std::io::Result<()> {
        let stored = encode_stored(b"Hello World", CompressionMethod::None)?;
        assert_eq!(&stored[..], b"Hello World");

        Ok(())
    }
}

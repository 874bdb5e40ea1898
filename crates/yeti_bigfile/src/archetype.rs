//! Typed views over the content of loaded files.
//!
//! The container only carries a one byte tag per file. Once a file body has been loaded, the tag decides how the
//! header ints and payload are interpreted.

use std::io::Cursor;

use binrw::BinRead;

use crate::types::FileKey;

/// Archetype tag stored in each file record
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Archetype {
    /// No typed view
    #[default]
    Generic,
    /// Texture description, references its [`Archetype::TexturePayload`]
    TextureMetadata,
    /// Raw texel data of a texture
    TexturePayload,
    /// A tag this library does not know about, kept so it survives re-packing
    Unknown(u8),
}

impl From<u8> for Archetype {
    fn from(value: u8) -> Self {
        match value {
            0 => Archetype::Generic,
            1 => Archetype::TextureMetadata,
            2 => Archetype::TexturePayload,
            other => Archetype::Unknown(other),
        }
    }
}

impl From<Archetype> for u8 {
    fn from(value: Archetype) -> Self {
        match value {
            Archetype::Generic => 0,
            Archetype::TextureMetadata => 1,
            Archetype::TexturePayload => 2,
            Archetype::Unknown(other) => other,
        }
    }
}

/// Pixel layout of a texture payload
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba32,
    Dxt1,
    Dxt5,
    Alpha8,
    Unknown(u8),
}

impl From<u8> for TextureFormat {
    fn from(value: u8) -> Self {
        match value {
            0 => TextureFormat::Rgba32,
            1 => TextureFormat::Dxt1,
            2 => TextureFormat::Dxt5,
            3 => TextureFormat::Alpha8,
            other => TextureFormat::Unknown(other),
        }
    }
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawTextureMetadata {
    width: u16,
    height: u16,
    mip_count: u8,
    format: u8,
}

/// Description of a texture, read from a [`Archetype::TextureMetadata`] file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureMetadata {
    pub width: u16,
    pub height: u16,
    pub mip_count: u8,
    pub format: TextureFormat,
    /// Key of the file holding the texels
    pub payload: Option<FileKey>,
}

impl TextureMetadata {
    /// Interpret a loaded texture metadata file, `None` if the payload is too short
    pub fn parse(header: &[i32], payload: &[u8]) -> Option<Self> {
        let raw = RawTextureMetadata::read(&mut Cursor::new(payload)).ok()?;
        Some(Self {
            width: raw.width,
            height: raw.height,
            mip_count: raw.mip_count,
            format: raw.format.into(),
            payload: header.first().copied().and_then(FileKey::from_header_int),
        })
    }
}

/// Typed interpretation attached to a file once it is loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchetypeView {
    TextureMetadata(TextureMetadata),
    /// Only the raw header and payload are available
    Raw,
}

impl ArchetypeView {
    /// Build the view for `archetype` over a loaded body
    pub fn attach(archetype: Archetype, header: &[i32], payload: &[u8]) -> Self {
        match archetype {
            Archetype::TextureMetadata => TextureMetadata::parse(header, payload)
                .map(ArchetypeView::TextureMetadata)
                .unwrap_or(ArchetypeView::Raw),
            _ => ArchetypeView::Raw,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::archetype::{Archetype, ArchetypeView, TextureFormat, TextureMetadata};
    use crate::types::FileKey;

    #[test]
    fn tags_survive_conversion() {
        for tag in [0u8, 1, 2, 77] {
            assert_eq!(u8::from(Archetype::from(tag)), tag);
        }
        assert_eq!(Archetype::from(77), Archetype::Unknown(77));
    }

    #[test]
    fn texture_metadata_view() {
        #[rustfmt::skip]
        let payload = [
            0x00, 0x01,
            0x80, 0x00,
            0x05,
            0x02,
        ];

        let view = ArchetypeView::attach(Archetype::TextureMetadata, &[0x42], &payload);
        assert_eq!(
            view,
            ArchetypeView::TextureMetadata(TextureMetadata {
                width: 256,
                height: 128,
                mip_count: 5,
                format: TextureFormat::Dxt5,
                payload: Some(FileKey(0x42)),
            })
        );
    }

    #[test]
    fn short_texture_metadata_falls_back_to_raw() {
        let view = ArchetypeView::attach(Archetype::TextureMetadata, &[], &[0x01]);
        assert_eq!(view, ArchetypeView::Raw);
    }
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use yeti_bigfile::buffers::BufferPool;
use yeti_bigfile::error::Result;
use yeti_bigfile::metadata::Metadata;
use yeti_bigfile::payload::encode_body;
use yeti_bigfile::types::{encode_name, BigFileHeader, FileRecord, FolderRecord};
use yeti_bigfile::write::{BigFileWriter, FileOptions};
use yeti_bigfile::{Archetype, BigFile, CompressionMethod, FileKey, ReadFlags, ROOT_FOLDER_ID};

pub const README: FileKey = FileKey(0x10);
pub const TEXTURE: FileKey = FileKey(0x20);
pub const TEXELS: FileKey = FileKey(0x21);
pub const MESH: FileKey = FileKey(0x30);
pub const GHOST: FileKey = FileKey(0x40);

/// A small archive with nested folders, a name collision, references and an unlinked file
pub fn sample_bigfile(compression: CompressionMethod) -> Result<Vec<u8>> {
    let mut big = BigFileWriter::new(Cursor::new(Vec::new()));
    let tex = big.add_folder("tex", ROOT_FOLDER_ID)?;
    let meshes = big.add_folder("meshes", ROOT_FOLDER_ID)?;

    let options = |folder, archetype| {
        FileOptions::builder()
            .folder(folder)
            .compression(compression)
            .archetype(archetype)
            .build()
    };

    big.start_file(README, "readme.txt", options(ROOT_FOLDER_ID, Archetype::Generic))?;
    big.write_all(&encode_body(&[], b"hello yeti"))?;

    big.start_file(TEXTURE, "a.dds", options(tex, Archetype::TextureMetadata))?;
    big.write_all(&encode_body(&[TEXELS.0 as i32], &[64, 0, 32, 0, 5, 2]))?;

    big.start_file(TEXELS, "a.dds", options(tex, Archetype::TexturePayload))?;
    big.write_all(&encode_body(&[], &[0x5A; 512]))?;

    big.start_file(MESH, "rock.msh", options(meshes, Archetype::Generic))?;
    big.write_all(&encode_body(&[TEXTURE.0 as i32, -1], b"vertices and indices"))?;

    big.add_unlinked_file(GHOST, "ghost.bin", options(meshes, Archetype::Generic))?;

    Ok(big.finish()?.into_inner())
}

fn push_frame(segment: &mut Vec<u8>, offset: i32, body: &[u8]) {
    segment.resize(offset as usize * 8, 0);
    segment.extend_from_slice(&(body.len() as u32).to_le_bytes());
    segment.extend_from_slice(body);
}

/// Folder `tex/` holding two `a.dds`, the first at offset 10 (100 bytes), the second at offset 3 (50 bytes)
pub fn colliding_bigfile() -> Result<Vec<u8>> {
    let first = encode_body(&[], &[0xAA; 96]);
    let second = encode_body(&[], &[0xBB; 46]);

    let record = |key, offset, size| -> Result<FileRecord> {
        Ok(FileRecord {
            key: FileKey(key),
            offset,
            size,
            compression: CompressionMethod::None,
            file_type: 0,
            folder: 1,
            name: encode_name("a.dds")?,
        })
    };
    let metadata = Metadata::new(
        BigFileHeader::default(),
        vec![record(0xA, 10, 100)?, record(0xB, 3, 50)?],
        vec![
            FolderRecord::default(),
            FolderRecord {
                id: 1,
                parent: ROOT_FOLDER_ID,
                name: encode_name("tex")?,
            },
        ],
    );

    let mut segment = Vec::new();
    push_frame(&mut segment, 3, &second);
    push_frame(&mut segment, 10, &first);

    let mut bytes = Cursor::new(Vec::new());
    metadata.write(&mut bytes)?;
    bytes.write_all(&segment)?;
    Ok(bytes.into_inner())
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Path and body of every file with a payload, by key
pub fn bodies(big: &BigFile) -> Result<BTreeMap<FileKey, (String, Vec<u8>)>> {
    let mut reader = big.open_reader()?;
    let mut pool = BufferPool::new();
    let mut bodies = BTreeMap::new();

    for file in big.files_list()? {
        if file.is_unlinked() {
            continue;
        }
        let read = reader.read_file(&file, &mut pool, ReadFlags::default())?;
        bodies.insert(file.key(), (file.full_path().to_owned(), read.body().to_vec()));
    }

    Ok(bodies)
}

use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn sample(files: u32, compression: yeti_bigfile::CompressionMethod) -> Vec<u8> {
    use std::io::{Cursor, Write};
    use yeti_bigfile::payload::encode_body;
    use yeti_bigfile::write::{BigFileWriter, FileOptions};

    let mut big = BigFileWriter::new(Cursor::new(Vec::new()));
    let folder = big.add_folder("data", yeti_bigfile::ROOT_FOLDER_ID).unwrap();
    for i in 0..files {
        let options = FileOptions::builder()
            .folder(folder)
            .compression(compression)
            .build();
        big.start_file(yeti_bigfile::FileKey(i), &format!("file_{i}.bin"), options)
            .unwrap();
        big.write_all(&encode_body(&[i as i32 - 1], &vec![(i % 251) as u8; 4096]))
            .unwrap();
    }
    big.finish().unwrap().into_inner()
}

pub mod read {
    use std::io::Cursor;

    use divan::Bencher;
    use yeti_bigfile::buffers::BufferPool;
    use yeti_bigfile::metadata::Metadata;
    use yeti_bigfile::reader::{BatchRead, FileReader, PackedReader};
    use yeti_bigfile::tree::build;
    use yeti_bigfile::{CompressionMethod, ReadFlags};

    #[divan::bench(args = [CompressionMethod::None, CompressionMethod::Zlib])]
    fn open(bencher: Bencher, compression: CompressionMethod) {
        bencher
            .with_inputs(|| super::sample(256, compression))
            .bench_refs(|data| {
                let metadata = Metadata::read(&mut Cursor::new(data)).unwrap();
                divan::black_box(build(&metadata).unwrap());
            });
    }

    #[divan::bench(args = [CompressionMethod::None, CompressionMethod::Zlib])]
    fn read_file_all(bencher: Bencher, compression: CompressionMethod) {
        let data = super::sample(256, compression);
        let metadata = Metadata::read(&mut Cursor::new(&data)).unwrap();
        let (_, mapping) = build(&metadata).unwrap();
        let mut reader = PackedReader::new(Cursor::new(data), metadata.data_offset()).unwrap();
        let mut pool = BufferPool::new();

        bencher.bench_local(move || {
            let mut batch = BatchRead::new(
                &mut reader,
                &mut pool,
                mapping.files_list(),
                ReadFlags::default(),
            );
            while let Some((_, read)) = batch.next_file() {
                divan::black_box(read.unwrap().size());
            }
        });
    }

    #[divan::bench]
    fn read_headers(bencher: Bencher) {
        let data = super::sample(256, CompressionMethod::Zlib);
        let metadata = Metadata::read(&mut Cursor::new(&data)).unwrap();
        let (_, mapping) = build(&metadata).unwrap();
        let mut reader = PackedReader::new(Cursor::new(data), metadata.data_offset()).unwrap();

        bencher.bench_local(move || {
            for file in mapping.files_list() {
                divan::black_box(reader.read_header(file, ReadFlags::default()).unwrap());
            }
        });
    }
}

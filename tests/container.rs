use std::io::Cursor;

use strongbox::crypto::keyblock::KEY_BLOCK_LEN;
use strongbox::crypto::{KdfParams, KeyBlockSet, MIN_HASH_ITERATIONS, NONCE_LEN};
use strongbox::format::{ContainerReader, ContainerWriter, Header, entry_type};
use strongbox::{Entry, ErrorKind, Record, WriterContext};

fn context(iterations: u32) -> WriterContext {
    WriterContext::new("strongbox test", "tester", "testhost")
        .with_kdf(KdfParams::new(iterations).unwrap())
}

fn write_file(
    blocks: &mut KeyBlockSet,
    passphrase: &str,
    header: &mut Header,
    records: &[Record],
    iterations: u32,
) -> Vec<u8> {
    let mut writer =
        ContainerWriter::open(Vec::new(), blocks, passphrase, header, &context(iterations))
            .unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.close().unwrap()
}

fn read_file(buf: Vec<u8>, passphrase: &str) -> Result<(Header, Vec<Record>), ErrorKind> {
    let reader = ContainerReader::open(Cursor::new(buf), passphrase).map_err(|e| e.kind())?;
    let (header, _, _, records) = reader.read_all().map_err(|e| e.kind())?;
    Ok((header, records))
}

fn sample_records() -> Vec<Record> {
    let mut mail = Entry::new("mail", "hunter2");
    mail.set_text(entry_type::USER, "alice");
    mail.set_text(entry_type::NOTES, &"long notes ".repeat(20));
    vec![
        Record::Entry(Entry::new("example", "s3cr3t")),
        Record::Entry(mail),
    ]
}

#[test]
fn concrete_scenario() {
    let mut header = Header::with_name("vault1");
    let mut blocks = KeyBlockSet::new();
    let buf = write_file(
        &mut blocks,
        "correct horse",
        &mut header,
        &[Record::Entry(Entry::new("example", "s3cr3t"))],
        100_000,
    );

    let (read_header, records) = read_file(buf.clone(), "correct horse").unwrap();
    assert_eq!(read_header.db_name.as_deref(), Some("vault1"));
    assert_eq!(records.len(), 1);
    let Record::Entry(entry) = &records[0] else {
        panic!("expected an entry");
    };
    assert_eq!(entry.title(), "example");
    assert_eq!(entry.password(), "s3cr3t");

    assert_eq!(read_file(buf.clone(), "wrong").unwrap_err(), ErrorKind::WrongPassword);

    let mut cut = buf;
    cut.truncate(cut.len() - 10);
    assert_eq!(read_file(cut, "correct horse").unwrap_err(), ErrorKind::TruncatedFile);
}

#[test]
fn round_trip_preserves_header_and_records() {
    let mut header = Header::with_name("roundtrip");
    header.db_description = Some("all the things".into());
    header.empty_groups = vec!["Archive".into(), "Work.Old".into()];
    let records = sample_records();

    let buf = write_file(
        &mut KeyBlockSet::new(),
        "pw",
        &mut header,
        &records,
        MIN_HASH_ITERATIONS,
    );
    let (read_header, read_records) = read_file(buf, "pw").unwrap();
    assert_eq!(read_header, header);
    assert_eq!(read_records, records);
}

#[test]
fn every_passphrase_reads_the_same_plaintext() {
    let kdf = KdfParams::new(MIN_HASH_ITERATIONS).unwrap();
    let (mut blocks, keys) = KeyBlockSet::create("p1", kdf).unwrap();
    let keys2 = blocks.add_block(Some("p1"), "p2", kdf).unwrap();
    assert_eq!(keys, keys2);

    let records = sample_records();
    let buf = write_file(&mut blocks, "p1", &mut Header::new(), &records, MIN_HASH_ITERATIONS);

    let (h1, r1) = read_file(buf.clone(), "p1").unwrap();
    let (h2, r2) = read_file(buf, "p2").unwrap();
    assert_eq!(h1, h2);
    assert_eq!(r1, records);
    assert_eq!(r2, records);
}

#[test]
fn wrong_passphrase_is_rejected() {
    let buf = write_file(
        &mut KeyBlockSet::new(),
        "right",
        &mut Header::new(),
        &[],
        MIN_HASH_ITERATIONS,
    );
    assert_eq!(read_file(buf, "Right").unwrap_err(), ErrorKind::WrongPassword);
}

#[test]
fn single_byte_flips_never_go_unnoticed() {
    let buf = write_file(
        &mut KeyBlockSet::new(),
        "pw",
        &mut Header::with_name("tamper"),
        &sample_records(),
        MIN_HASH_ITERATIONS,
    );

    let blocks_start = NONCE_LEN;
    let end_digest = NONCE_LEN + KEY_BLOCK_LEN + 32;
    let records_start = end_digest + 32 + 16;
    let positions = [
        blocks_start,                     // salt
        blocks_start + 32,                // iteration count
        blocks_start + 40,                // wrapped K
        blocks_start + 80,                // wrapped L
        end_digest,                       // end-of-key-blocks digest
        records_start,                    // first header field
        records_start + 40,               // header data
        buf.len() - 32 - 48 - 40,         // record data
        buf.len() - 1,                    // file HMAC
    ];

    for pos in positions {
        let mut tampered = buf.clone();
        tampered[pos] ^= 0x01;
        let err = read_file(tampered, "pw").unwrap_err();
        assert!(
            matches!(err, ErrorKind::BadDigest | ErrorKind::WrongPassword),
            "flip at {pos} gave {err:?}"
        );
    }
}

#[test]
fn damaged_iteration_count_reads_as_wrong_password() {
    let buf = write_file(
        &mut KeyBlockSet::new(),
        "pw",
        &mut Header::new(),
        &[],
        MIN_HASH_ITERATIONS,
    );
    let count = NONCE_LEN + 32;

    // 2048 -> 0, 2048 -> 2049, 2048 -> 16_779_264
    for (offset, bit) in [(1, 0x08), (0, 0x01), (3, 0x01)] {
        let mut tampered = buf.clone();
        tampered[count + offset] ^= bit;
        assert_eq!(
            read_file(tampered, "pw").unwrap_err(),
            ErrorKind::WrongPassword,
            "flip at byte {offset} of the iteration count"
        );
    }
}

#[test]
fn nonce_and_iv_change_on_every_write() {
    let kdf = KdfParams::new(MIN_HASH_ITERATIONS).unwrap();
    let (mut blocks, _) = KeyBlockSet::create("pw", kdf).unwrap();
    let a = write_file(&mut blocks, "pw", &mut Header::new(), &[], MIN_HASH_ITERATIONS);
    let b = write_file(&mut blocks, "pw", &mut Header::new(), &[], MIN_HASH_ITERATIONS);

    assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    // key blocks are reused verbatim
    assert_eq!(
        a[NONCE_LEN..NONCE_LEN + KEY_BLOCK_LEN],
        b[NONCE_LEN..NONCE_LEN + KEY_BLOCK_LEN]
    );
}

use sarc_crypto::{decrypt, derive_key, encrypt, ArchiveSalt, DerivedKey, KdfParams, MasterKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt(bencher: divan::Bencher, size: usize) {
    let key = DerivedKey::from_bytes([0xABu8; 32]);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&data), divan::black_box(&key)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt(bencher: divan::Bencher, size: usize) {
    let key = DerivedKey::from_bytes([0xABu8; 32]);
    let envelope = encrypt(&make_data(size), &key).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt(divan::black_box(&envelope), divan::black_box(&key)).unwrap());
}

#[divan::bench(sample_count = 10)]
fn bench_derive_key_default_params(bencher: divan::Bencher) {
    let master = MasterKey::from_bytes([42u8; 32]);
    let salt = ArchiveSalt::generate();
    let params = KdfParams::default();
    bencher.bench(|| {
        derive_key(
            divan::black_box(&master),
            divan::black_box(salt.as_bytes()),
            &params,
        )
        .unwrap()
    });
}

fn main() {
    divan::main();
}

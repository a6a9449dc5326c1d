use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Random alphanumeric string from the OS CSPRNG
pub fn random_alphanumeric(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Fixed-width decimal code, zero-padded (leading zeros are significant)
pub fn random_digits(width: usize) -> String {
    let mut rng = OsRng;
    (0..width)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Random string drawn from `alphabet`
pub fn random_from_alphabet(alphabet: &[u8], len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
        .collect()
}

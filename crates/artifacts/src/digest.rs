use std::fmt;

/// A BLAKE3 digest.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct Digest {
    /// Uses BLAKE3 which fits in 32 bytes.
    pub data: [u8; Self::SIZE],
}

impl Digest {
    /// The size of the hash function's output in bytes.
    pub const SIZE: usize = 32;

    /// Returns the digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            data: blake3::hash(bytes).into(),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.data)
    }

    /// The first 12 hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.data[..6])
    }
}

impl From<[u8; Digest::SIZE]> for Digest {
    fn from(data: [u8; Digest::SIZE]) -> Self {
        Self { data }
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self { data: hash.into() }
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = ();

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let data: [u8; Self::SIZE] = data.try_into().map_err(drop)?;
        Ok(Self { data })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Identifies one invocation of a task:
/// equal fingerprints mean interchangeable results.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct Fingerprint(pub Digest);

impl Fingerprint {
    pub fn builder(domain: &str) -> FingerprintBuilder {
        FingerprintBuilder::new(domain)
    }

    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Accumulates tagged, length prefixed fields into a [Fingerprint].
///
/// Fields are order sensitive.
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart.
#[derive(Clone)]
pub struct FingerprintBuilder {
    hasher: blake3::Hasher,
}

impl FingerprintBuilder {
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: blake3::Hasher::new(),
        };
        builder.put(domain.as_bytes());
        builder
    }

    fn put(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn bytes(mut self, tag: &str, bytes: &[u8]) -> Self {
        self.put(tag.as_bytes());
        self.put(bytes);
        self
    }

    pub fn str(self, tag: &str, value: &str) -> Self {
        self.bytes(tag, value.as_bytes())
    }

    pub fn digest(self, tag: &str, digest: &Digest) -> Self {
        self.bytes(tag, &digest.data)
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}

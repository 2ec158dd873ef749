use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::{
    storage::pager::{Pager, is_valid_page_size},
    types::{
        DEFAULT_PAGE_SIZE, KDF_SALT_SIZE, PageNo, SQLITE_MAGIC,
        error::{RepairError, ResultCode, Result},
    },
};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_KDF_ITER: u32 = 64000;
pub const DEFAULT_CIPHER: &str = "aes-256-cbc";

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;
const HMAC_SIZE: usize = 20;
const HMAC_SALT_MASK: u8 = 0x3a;
const FAST_KDF_ITER: u32 = 2;

/// Decrypts pages in place before the walker sees them.
pub trait PageCodec: Send {
    fn decode_page(&self, pgno: PageNo, data: &mut [u8]) -> Result<()>;
    fn page_size(&self) -> usize;
    fn reserved_size(&self) -> usize;
}

/// Key material and parameters for an encrypted source file.
///
/// A config without a key only forces the page size of a plaintext file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherConfig {
    #[serde(default, with = "text_key")]
    pub key: Option<Vec<u8>>,
    #[serde(default)]
    pub cipher_name: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub kdf_iter: Option<u32>,
    #[serde(default)]
    pub use_hmac: Option<bool>,
    #[serde(default, with = "hex_salt")]
    pub kdf_salt: Option<[u8; KDF_SALT_SIZE]>,
}

impl CipherConfig {
    pub fn with_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
            .filter(|size| *size > 0)
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn kdf_iter(&self) -> u32 {
        self.kdf_iter.filter(|iter| *iter > 0).unwrap_or(DEFAULT_KDF_ITER)
    }

    pub fn use_hmac(&self) -> bool {
        self.use_hmac.unwrap_or(true)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RepairError::misuse(format!("invalid cipher config: {e}")))
    }
}

mod text_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(bytes) => s.serialize_some(&String::from_utf8_lossy(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Ok(Option::<String>::deserialize(d)?.map(String::into_bytes))
    }
}

mod hex_salt {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::types::KDF_SALT_SIZE;

    pub fn serialize<S: Serializer>(
        salt: &Option<[u8; KDF_SALT_SIZE]>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match salt {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<[u8; KDF_SALT_SIZE]>, D::Error> {
        let Some(text) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        let salt: [u8; KDF_SALT_SIZE] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("kdf_salt must be 16 bytes"))?;
        Ok(Some(salt))
    }
}

/// SQLCipher 3 compatible page codec: PBKDF2-HMAC-SHA1 key derivation,
/// AES-256-CBC per page and an HMAC-SHA1 trailer.
pub struct SqlCipherCodec {
    key: [u8; KEY_SIZE],
    hmac_key: [u8; KEY_SIZE],
    page_size: usize,
    use_hmac: bool,
    reserve: usize,
}

impl SqlCipherCodec {
    pub fn new(conf: &CipherConfig, salt: &[u8; KDF_SALT_SIZE]) -> Result<Self> {
        let pass = match conf.key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => return Err(RepairError::misuse("cipher key must not be empty")),
        };

        let key = match raw_key(pass) {
            Some(key) => key,
            None => {
                let mut key = [0u8; KEY_SIZE];
                pbkdf2::pbkdf2_hmac::<Sha1>(pass, salt, conf.kdf_iter(), &mut key);
                key
            }
        };

        let mut hmac_salt = *salt;
        for byte in hmac_salt.iter_mut() {
            *byte ^= HMAC_SALT_MASK;
        }
        let mut hmac_key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha1>(&key, &hmac_salt, FAST_KDF_ITER, &mut hmac_key);

        let use_hmac = conf.use_hmac();
        let trailer = IV_SIZE + if use_hmac { HMAC_SIZE } else { 0 };
        let reserve = trailer.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        Ok(Self {
            key,
            hmac_key,
            page_size: conf.page_size(),
            use_hmac,
            reserve,
        })
    }

    fn page_hmac(&self, pgno: PageNo, content: &[u8]) -> Result<HmacSha1> {
        let mut mac = HmacSha1::new_from_slice(&self.hmac_key)
            .map_err(|e| RepairError::misuse(format!("hmac key: {e}")))?;
        mac.update(content);
        mac.update(&pgno.to_le_bytes());
        Ok(mac)
    }

    fn region(pgno: PageNo) -> usize {
        if pgno == 1 { KDF_SALT_SIZE } else { 0 }
    }

    /// Encrypts a plaintext page in place with the given IV. Page 1 keeps its
    /// first 16 bytes untouched so callers can store the KDF salt there.
    pub fn encode_page(&self, pgno: PageNo, data: &mut [u8], iv: &[u8; IV_SIZE]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(RepairError::misuse(format!(
                "page buffer is {} bytes, expected {}",
                data.len(),
                self.page_size
            )));
        }
        let body = &mut data[Self::region(pgno)..];
        let size = body.len() - self.reserve;
        let (content, trailer) = body.split_at_mut(size);
        Aes256CbcEnc::new_from_slices(&self.key, iv)
            .map_err(|e| RepairError::misuse(format!("cipher init: {e}")))?
            .encrypt_padded_mut::<NoPadding>(content, size)
            .map_err(|e| RepairError::misuse(format!("encrypt: {e}")))?;
        trailer[..IV_SIZE].copy_from_slice(iv);
        if self.use_hmac {
            let mut signed = content.to_vec();
            signed.extend_from_slice(iv);
            let tag = self.page_hmac(pgno, &signed)?.finalize().into_bytes();
            trailer[IV_SIZE..IV_SIZE + HMAC_SIZE].copy_from_slice(&tag);
        }
        Ok(())
    }
}

impl PageCodec for SqlCipherCodec {
    fn decode_page(&self, pgno: PageNo, data: &mut [u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(RepairError::misuse(format!(
                "page buffer is {} bytes, expected {}",
                data.len(),
                self.page_size
            )));
        }
        let offset = Self::region(pgno);
        if offset > 0 {
            data[..offset].copy_from_slice(SQLITE_MAGIC);
        }
        let body = &mut data[offset..];
        if body.iter().all(|b| *b == 0) {
            return Ok(());
        }

        let size = body.len() - self.reserve;
        let (content, trailer) = body.split_at_mut(size);
        if self.use_hmac {
            let signed_len = size + IV_SIZE;
            let mut signed = Vec::with_capacity(signed_len);
            signed.extend_from_slice(content);
            signed.extend_from_slice(&trailer[..IV_SIZE]);
            self.page_hmac(pgno, &signed)?
                .verify_slice(&trailer[IV_SIZE..IV_SIZE + HMAC_SIZE])
                .map_err(|_| RepairError::damaged(format!("HMAC check failed for page {pgno}")))?;
        }
        Aes256CbcDec::new_from_slices(&self.key, &trailer[..IV_SIZE])
            .map_err(|e| RepairError::damaged(format!("cipher init: {e}")))?
            .decrypt_padded_mut::<NoPadding>(content)
            .map_err(|e| RepairError::damaged(format!("failed to decode page {pgno}: {e}")))?;
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn reserved_size(&self) -> usize {
        self.reserve
    }
}

/// `x'<64 hex digits>'` passes a raw key and skips the KDF.
fn raw_key(pass: &[u8]) -> Option<[u8; KEY_SIZE]> {
    let inner = pass.strip_prefix(b"x'")?.strip_suffix(b"'")?;
    if inner.len() != KEY_SIZE * 2 {
        return None;
    }
    let decoded = hex::decode(inner).ok()?;
    decoded.try_into().ok()
}

/// Installs a codec on `pager`, reading the KDF salt from the file unless the
/// config supplies one.
pub fn install_cipher(pager: &mut Pager, conf: &CipherConfig) -> Result<()> {
    if conf.key.as_ref().is_none_or(|key| key.is_empty()) {
        return Err(RepairError::misuse("cipher key must not be empty"));
    }
    if let Some(name) = conf.cipher_name.as_deref() {
        if !name.eq_ignore_ascii_case(DEFAULT_CIPHER) {
            pager.logger().error(
                ResultCode::CantOpen,
                format_args!("Failed to initialize cipher context: unsupported cipher '{name}'"),
            );
            return Err(pager.cant_open(format!("unsupported cipher '{name}'")));
        }
    }
    let page_size = conf.page_size();
    if !is_valid_page_size(page_size) {
        pager.logger().error(
            ResultCode::CantOpen,
            format_args!("Failed to initialize cipher context: invalid page size {page_size}"),
        );
        return Err(pager.cant_open(format!("invalid page size {page_size}")));
    }

    let salt = match conf.kdf_salt {
        Some(salt) => salt,
        None => {
            let mut salt = [0u8; KDF_SALT_SIZE];
            pager.read_at(0, &mut salt)?;
            salt
        }
    };

    let codec = SqlCipherCodec::new(conf, &salt)?;
    pager.set_codec(Box::new(codec));
    Ok(())
}

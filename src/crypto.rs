//! 消息加密工具
//!
//! payload 加密为 AES-CBC-PKCS7 后再 Base64；MsgKey 为校验串加密后的 MD5，
//! 用于客户端校验帧未被篡改。密钥和IV在连接认证时协商，挂在连接上。

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{DeliveryError, DeliveryResult};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

/// AES-CBC-PKCS7 加密后 Base64 编码
pub fn aes_encrypt_pkcs7_base64(data: &[u8], key: &[u8], iv: &[u8]) -> DeliveryResult<String> {
    if iv.len() != IV_LEN {
        return Err(DeliveryError::InvalidIvLength(iv.len()));
    }
    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        24 => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        n => return Err(DeliveryError::InvalidKeyLength(n)),
    };
    Ok(STANDARD.encode(ciphertext))
}

/// Base64 解码后 AES-CBC-PKCS7 解密
pub fn aes_decrypt_pkcs7_base64(data: &str, key: &[u8], iv: &[u8]) -> DeliveryResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(DeliveryError::InvalidIvLength(iv.len()));
    }
    let ciphertext = STANDARD
        .decode(data)
        .map_err(|e| DeliveryError::Encrypt(format!("base64 decode failed: {}", e)))?;
    let plaintext = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?,
        24 => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?,
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| DeliveryError::Encrypt(e.to_string()))?,
        n => return Err(DeliveryError::InvalidKeyLength(n)),
    };
    Ok(plaintext)
}

/// 生成MsgKey：校验串加密后取MD5（十六进制小写）
pub fn make_msg_key(verify_str: &str, key: &[u8], iv: &[u8]) -> DeliveryResult<String> {
    let encrypted = aes_encrypt_pkcs7_base64(verify_str.as_bytes(), key, iv)
        .map_err(|e| DeliveryError::MsgKey(e.to_string()))?;
    Ok(format!("{:x}", md5::compute(encrypted.as_bytes())))
}

//! Fixed-size measurement and report-data newtypes.
//!
//! Quote bodies are full of fixed-width byte arrays (32-byte enclave
//! measurements, 48-byte TD measurement registers, 64-byte report data).
//! These newtypes carry the width in the type and render as lowercase hex.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

macro_rules! byte_newtype {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Copy, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_array(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Case-insensitive comparison against a hex string.
            pub fn matches_hex(&self, s: &str) -> bool {
                s.len() == $len * 2 && s.eq_ignore_ascii_case(&self.to_hex())
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                <[u8; $len]>::try_from(slice).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in self.0.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(\"{}\")"), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_str(&s).map_err(de::Error::custom)
            }
        }
    };
}

byte_newtype!(
    Measurement32,
    32,
    "A 32-byte measurement (SGX `mr_enclave` / `mr_signer`, SNP `host_data`)."
);
byte_newtype!(
    Measurement48,
    48,
    "A 48-byte measurement (TDX `mr_td` / `rtmr*` / `mr_seam`, SNP `measurement`)."
);
byte_newtype!(
    Measurement64,
    64,
    "A 64-byte value (SNP `chip_id`)."
);
byte_newtype!(
    ReportData,
    64,
    "The 64-byte application-chosen `report_data` field of a quote."
);

impl ReportData {
    /// Whether the second half (bytes 32..64) is all zero. Several binding
    /// schemes only use the first 32 bytes and require zero padding.
    pub fn tail_is_zero(&self) -> bool {
        self.0[32..].iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let m = Measurement32::new([0xab; 32]);
        assert_eq!(m.to_hex(), "ab".repeat(32));
        assert_eq!(Measurement32::from_str(&m.to_hex()).unwrap(), m);
    }

    #[test]
    fn test_matches_hex_case_insensitive() {
        let m = Measurement48::new([0x5a; 48]);
        assert!(m.matches_hex(&"5a".repeat(48)));
        assert!(m.matches_hex(&"5A".repeat(48)));
        assert!(!m.matches_hex(&"5b".repeat(48)));
        assert!(!m.matches_hex("5a"));
    }

    #[test]
    fn test_report_data_tail() {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&[7u8; 32]);
        assert!(ReportData::new(bytes).tail_is_zero());
        bytes[63] = 1;
        assert!(!ReportData::new(bytes).tail_is_zero());
    }

    #[test]
    fn test_serde_json_hex_string() {
        let m = Measurement32::new([1u8; 32]);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Measurement32 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}

// src/utils/id_generator.rs
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    User,
    Ride,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::User => "usr",
            IdType::Ride => "rid",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "usr" => Some(IdType::User),
            "rid" => Some(IdType::Ride),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

const HEX_CHARS: &[u8] = b"0123456789abcdef";
const ALPHANUMERIC_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{yymmdd}-{suffix}
    /// where the suffix is 3 hex chars followed by 5 alphanumeric chars.
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d");
        format!(
            "{}-{}-{}{}",
            id_type.to_prefix(),
            date_part,
            Self::generate_from_chars(HEX_CHARS, 3),
            Self::generate_from_chars(ALPHANUMERIC_CHARS, 5)
        )
    }

    /// Four-digit ride OTP, never starting with zero.
    pub fn generate_otp() -> String {
        rand::rng().random_range(1000..10000).to_string()
    }

    /// Stub gateway references for a completed online payment.
    pub fn generate_payment_reference() -> (String, String) {
        let payment_id = format!("pay_{}", nanoid::nanoid!(24));
        let order_id = format!("order_{}", uuid::Uuid::new_v4().simple());
        (payment_id, order_id)
    }

    fn generate_from_chars(charset: &[u8], n: usize) -> String {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| charset[rng.random_range(0..charset.len())] as char)
            .collect()
    }

    /// Validate if an ID matches the expected format and type
    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        let mut parts = id.splitn(3, '-');
        let (Some(prefix), Some(date), Some(suffix)) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };
        let Some(id_type) = IdType::from_prefix(prefix) else {
            return false;
        };
        if date.len() != 6 || !date.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
        expected_type.is_none_or(|expected| expected == id_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_id_generation() {
        let user_id = IdGenerator::generate(IdType::User);
        assert!(user_id.starts_with("usr-"));
        assert_eq!(user_id.split('-').count(), 3);

        let ride_id = IdGenerator::generate(IdType::Ride);
        assert!(ride_id.starts_with("rid-"));
        assert!(IdGenerator::validate_id(&ride_id, Some(IdType::Ride)));
    }

    #[test]
    fn test_timestamped_ids() {
        let date = Utc.with_ymd_and_hms(2023, 12, 7, 0, 0, 0).unwrap();
        let id = IdGenerator::generate_with_timestamp(IdType::Ride, date);
        assert!(id.starts_with("rid-231207-"));
    }

    #[test]
    fn test_validation() {
        assert!(IdGenerator::validate_id("usr-231207-a1bXy9Zq", Some(IdType::User)));
        assert!(!IdGenerator::validate_id("usr-231207-a1bXy9Zq", Some(IdType::Ride)));
        assert!(!IdGenerator::validate_id("invalid-format", None));
        assert!(!IdGenerator::validate_id("rid-2312-a1bXy9Zq", None));
    }

    #[test]
    fn test_otp_shape() {
        for _ in 0..200 {
            let otp = IdGenerator::generate_otp();
            assert_eq!(otp.len(), 4);
            assert!(!otp.starts_with('0'));
        }
    }

    #[test]
    fn test_payment_reference() {
        let (payment_id, order_id) = IdGenerator::generate_payment_reference();
        assert!(payment_id.starts_with("pay_"));
        assert_eq!(payment_id.len(), 28);
        assert!(order_id.starts_with("order_"));
    }
}

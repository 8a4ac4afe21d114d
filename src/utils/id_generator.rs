// src/utils/id_generator.rs
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    User,
    Ride,
    Payment,
    Wallet,
    Transaction,
    Connection,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::User => "usr",
            IdType::Ride => "rid",
            IdType::Payment => "pay",
            IdType::Wallet => "wal",
            IdType::Transaction => "txn",
            IdType::Connection => "con",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "usr" => Some(IdType::User),
            "rid" => Some(IdType::Ride),
            "pay" => Some(IdType::Payment),
            "wal" => Some(IdType::Wallet),
            "txn" => Some(IdType::Transaction),
            "con" => Some(IdType::Connection),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{yymmdd}-{random_suffix}
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d").to_string();
        let random_suffix = Self::generate_random_suffix();

        format!("{}-{}-{}", id_type.to_prefix(), date_part, random_suffix)
    }

    /// 3 hex + 3 alphanumeric characters, or the other way round
    fn generate_random_suffix() -> String {
        if rand::random::<bool>() {
            format!(
                "{}{}",
                Self::generate_from_chars(HEX_CHARS, 3),
                Self::generate_from_chars(ALPHANUMERIC_CHARS, 3)
            )
        } else {
            format!(
                "{}{}",
                Self::generate_from_chars(ALPHANUMERIC_CHARS, 3),
                Self::generate_from_chars(HEX_CHARS, 3)
            )
        }
    }

    fn generate_from_chars(charset: &[u8], n: usize) -> String {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| charset[rng.random_range(0..charset.len())] as char)
            .collect()
    }

    /// Parse an ID to extract its components
    pub fn parse_id(id: &str) -> Option<ParsedId> {
        let parts: Vec<&str> = id.split('-').collect();
        if parts.len() != 3 {
            return None;
        }

        let (prefix, date_part, random_suffix) = (parts[0], parts[1], parts[2]);
        if date_part.len() != 6 || random_suffix.len() != SUFFIX_LEN {
            return None;
        }
        if !random_suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }

        let id_type = IdType::from_prefix(prefix)?;

        let year = 2000 + date_part[0..2].parse::<i32>().ok()?;
        let month = date_part[2..4].parse::<u32>().ok()?;
        let day = date_part[4..6].parse::<u32>().ok()?;

        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }

        Some(ParsedId {
            id_type,
            year,
            month,
            day,
            random_suffix: random_suffix.to_string(),
        })
    }

    /// Validate if an ID matches the expected format and type
    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        match Self::parse_id(id) {
            Some(parsed) => expected_type.is_none_or(|expected| parsed.id_type == expected),
            None => false,
        }
    }

    /// Gateway-facing transaction reference, e.g. `BK_3F9A1C0D`
    pub fn gateway_reference(prefix: &str) -> String {
        let alphabet: Vec<char> = "0123456789ABCDEF".chars().collect();
        format!("{}_{}", prefix, nanoid::nanoid!(8, &alphabet))
    }
}

const SUFFIX_LEN: usize = 6;
const HEX_CHARS: &[u8] = b"0123456789abcdef";
const ALPHANUMERIC_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedId {
    pub id_type: IdType,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub random_suffix: String,
}

pub trait WithGeneratedId {
    fn set_generated_id(&mut self, id_type: IdType);

    fn with_generated_id(mut self, id_type: IdType) -> Self
    where
        Self: Sized,
    {
        self.set_generated_id(id_type);
        self
    }
}

impl WithGeneratedId for crate::models::ride::Ride {
    fn set_generated_id(&mut self, id_type: IdType) {
        self.id = IdGenerator::generate(id_type);
    }
}

impl WithGeneratedId for crate::models::payment::Payment {
    fn set_generated_id(&mut self, id_type: IdType) {
        self.id = IdGenerator::generate(id_type);
    }
}

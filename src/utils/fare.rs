// src/utils/fare.rs
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};

/// How fares are rounded before they are quoted or stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FarePrecision {
    /// Two decimal places
    Cents,
    /// Legacy integer BDT mode
    WholeUnit,
}

impl FarePrecision {
    pub fn decimal_places(&self) -> u32 {
        match self {
            FarePrecision::Cents => 2,
            FarePrecision::WholeUnit => 0,
        }
    }

    pub fn parse(value: &str) -> DispatchResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cents" | "decimal" | "2" => Ok(FarePrecision::Cents),
            "whole" | "integer" | "0" => Ok(FarePrecision::WholeUnit),
            other => Err(DispatchError::Configuration(format!("Invalid FARE_PRECISION: {}", other))),
        }
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        let places = self.decimal_places();
        let mut rounded = amount.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(places);
        rounded
    }
}

impl Default for FarePrecision {
    fn default() -> Self {
        FarePrecision::Cents
    }
}

/// Rates a fare is computed from, usually read from a vehicle type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    pub per_minute_rate: Decimal,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            base_fare: Decimal::ZERO,
            per_km_rate: dec!(10),
            per_minute_rate: Decimal::ZERO,
        }
    }
}

/// `base + distance * per_km + duration * per_minute`, rounded per `precision`.
pub fn calculate_fare(
    distance_km: Decimal,
    tariff: &Tariff,
    duration_minutes: Decimal,
    precision: FarePrecision,
) -> Decimal {
    let raw = tariff.base_fare + distance_km * tariff.per_km_rate + duration_minutes * tariff.per_minute_rate;
    precision.round(raw)
}

/// Converts a float distance into the two-decimal value rides store.
pub fn distance_to_decimal(distance_km: f64) -> DispatchResult<Decimal> {
    let distance = Decimal::from_f64(distance_km)
        .ok_or_else(|| DispatchError::InvalidFormat(format!("Distance out of range: {}", distance_km)))?;
    Ok(FarePrecision::Cents.round(distance))
}

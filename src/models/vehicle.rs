// src/models/vehicle.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::utils::fare::Tariff;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VehicleType {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    pub per_minute_rate: Decimal,
}

impl VehicleType {
    pub fn tariff(&self) -> Tariff {
        Tariff {
            base_fare: self.base_fare,
            per_km_rate: self.per_km_rate,
            per_minute_rate: self.per_minute_rate,
        }
    }

    /// Catalog every fresh store starts with.
    pub fn seed() -> Vec<VehicleType> {
        vec![
            VehicleType {
                id: "car".to_string(),
                name: "Car".to_string(),
                description: Some("Private car, up to 4 riders".to_string()),
                base_fare: dec!(50.00),
                per_km_rate: dec!(25.00),
                per_minute_rate: dec!(2.00),
            },
            VehicleType {
                id: "bike".to_string(),
                name: "Bike".to_string(),
                description: Some("Motorbike, single rider".to_string()),
                base_fare: dec!(30.00),
                per_km_rate: dec!(15.00),
                per_minute_rate: dec!(1.00),
            },
        ]
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

use super::{Seat, SeatCategory, ShowingId, MAX_SEAT_NUMBER_LEN};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatPrices {
    pub standard: Decimal,
    pub vip: Decimal,
}

/// Seat map of a hall: every row gets `columns` seats, rows listed in
/// `vip_rows` are priced as VIP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_layout"))]
pub struct HallTemplate {
    #[validate(length(min = 1, max = 52))]
    pub rows: Vec<String>,
    #[serde(alias = "seatsPerRow", alias = "seats_per_row")]
    #[validate(range(min = 1, max = 100))]
    pub columns: u32,
    #[serde(default, alias = "vipRows")]
    pub vip_rows: Vec<String>,
    pub prices: SeatPrices,
}

impl HallTemplate {
    pub fn capacity(&self) -> usize {
        self.rows.len() * self.columns as usize
    }

    pub fn category_of(&self, row: &str) -> SeatCategory {
        if self.vip_rows.iter().any(|r| r == row) {
            SeatCategory::Vip
        } else {
            SeatCategory::Standard
        }
    }

    pub fn price_of(&self, category: SeatCategory) -> Decimal {
        match category {
            SeatCategory::Standard => self.prices.standard,
            SeatCategory::Vip => self.prices.vip,
        }
    }

    /// Expands the template into available seats, row by row.
    pub fn seats_for(&self, showing_id: ShowingId) -> Vec<Seat> {
        let mut seats = Vec::with_capacity(self.capacity());
        for row in &self.rows {
            let category = self.category_of(row);
            let price = self.price_of(category);
            for number in 1..=self.columns as i32 {
                seats.push(Seat::available(showing_id, row, number, category, price));
            }
        }
        seats
    }
}

fn validate_layout(template: &HallTemplate) -> Result<(), ValidationError> {
    // Самый длинный номер места: метка ряда плюс цифры последней колонки
    let column_digits = template.columns.to_string().len();
    let mut seen = HashSet::new();
    for row in &template.rows {
        if row.trim().is_empty() || !row.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::new("row_label"));
        }
        if row.len() + column_digits > MAX_SEAT_NUMBER_LEN {
            return Err(ValidationError::new("row_label_too_long"));
        }
        if !seen.insert(row.as_str()) {
            return Err(ValidationError::new("duplicate_row"));
        }
    }
    if template.vip_rows.iter().any(|r| !seen.contains(r.as_str())) {
        return Err(ValidationError::new("unknown_vip_row"));
    }
    if template.prices.standard.is_sign_negative() || template.prices.vip.is_sign_negative() {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

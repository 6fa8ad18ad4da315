//! Invoice arithmetic.
//!
//! Amounts are exact decimals. Every derived field is rounded once to two
//! places, half away from zero, from unrounded inputs.

use crate::error::InvoiceError;
use crate::models::{CreateInvoiceItem, InvoiceItem};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;
const DEFAULT_DESCRIPTION: &str = "Item";

/// Largest single amount accepted anywhere: 10^15. Leaves headroom in
/// NUMERIC(19, 2) for tax at 100% on top.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_320, 232_830, 0, false, 0);
/// Largest line quantity: 10^9.
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
/// Quantities and unit prices are stored with four places.
pub const LINE_SCALE: u32 = 4;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn round_line(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(LINE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn clamp_tax_rate(rate: Decimal) -> Decimal {
    rate.clamp(Decimal::ZERO, HUNDRED)
}

pub fn clamp_discount(discount: Decimal) -> Decimal {
    round2(discount.max(Decimal::ZERO))
}

/// `value` when it lies within `MAX_AMOUNT`.
pub fn bounded(value: Decimal) -> Result<Decimal, InvoiceError> {
    if value.abs() > MAX_AMOUNT {
        return Err(InvoiceError::AmountOutOfRange);
    }
    Ok(value)
}

/// `a + b`, bounded.
pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, InvoiceError> {
    a.checked_add(b)
        .ok_or(InvoiceError::AmountOutOfRange)
        .and_then(bounded)
}

/// Derived invoice totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Validate and price line inputs for `invoice_id`.
///
/// Negative quantities are rejected, negative unit prices become zero and a
/// blank description becomes "Item". Quantity and unit price are rounded to
/// their stored scale before the line total is derived from them.
pub fn price_items(
    invoice_id: Uuid,
    inputs: &[CreateInvoiceItem],
) -> Result<Vec<InvoiceItem>, InvoiceError> {
    if inputs.is_empty() {
        return Err(InvoiceError::EmptyItems);
    }

    let mut subtotal = Decimal::ZERO;
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            if input.quantity < Decimal::ZERO {
                return Err(InvoiceError::NegativeQuantity);
            }
            if input.quantity > MAX_QUANTITY {
                return Err(InvoiceError::AmountOutOfRange);
            }
            let quantity = round_line(input.quantity);
            let unit_price = round_line(bounded(input.unit_price.max(Decimal::ZERO))?);
            let line_total = quantity
                .checked_mul(unit_price)
                .ok_or(InvoiceError::AmountOutOfRange)
                .and_then(bounded)?;
            subtotal = add(subtotal, line_total)?;

            let description = match input.description.trim() {
                "" => DEFAULT_DESCRIPTION.to_string(),
                text if text.chars().count() > MAX_DESCRIPTION_CHARS => {
                    return Err(InvoiceError::DescriptionTooLong {
                        max: MAX_DESCRIPTION_CHARS,
                    });
                }
                text => text.to_string(),
            };
            Ok(InvoiceItem {
                item_id: Uuid::new_v4(),
                invoice_id,
                description,
                quantity,
                unit_price,
                line_total: round2(line_total),
                sort_order: index as i32,
            })
        })
        .collect()
}

/// Compute totals from the stored quantities and prices of `items`.
pub fn compute_totals(
    items: &[InvoiceItem],
    tax_rate: Decimal,
    discount: Decimal,
) -> Result<Totals, InvoiceError> {
    let tax_rate = clamp_tax_rate(tax_rate);
    let discount = bounded(clamp_discount(discount))?;

    let mut raw_subtotal = Decimal::ZERO;
    for item in items {
        let line = item
            .quantity
            .checked_mul(item.unit_price)
            .ok_or(InvoiceError::AmountOutOfRange)?;
        raw_subtotal = add(raw_subtotal, line)?;
    }
    let raw_tax = raw_subtotal * tax_rate / HUNDRED;
    let total = round2(raw_subtotal + raw_tax - discount).max(Decimal::ZERO);

    Ok(Totals {
        subtotal: round2(raw_subtotal),
        tax_rate,
        tax_amount: round2(raw_tax),
        discount,
        total,
    })
}

/// Total from already-rounded stored fields.
pub fn total_from_parts(subtotal: Decimal, tax_amount: Decimal, discount: Decimal) -> Decimal {
    round2(subtotal + tax_amount - discount).max(Decimal::ZERO)
}

/// Late fee on `outstanding`: `percent` of it, capped at `cap`.
/// Zero when there is nothing outstanding or the percentage is not positive.
pub fn late_fee(outstanding: Decimal, percent: Decimal, cap: Decimal) -> Decimal {
    if outstanding <= Decimal::ZERO || percent <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let cap = cap.max(Decimal::ZERO);
    match outstanding.checked_mul(percent) {
        Some(product) => round2(product / HUNDRED).min(cap),
        None => cap,
    }
}

/// Lenient parse of a free-text gateway amount.
///
/// Accepts surrounding whitespace and thousands separators. Returns `None`
/// for anything unparsable, not strictly positive, or above `MAX_AMOUNT`.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<Decimal>()
        .ok()
        .map(round2)
        .filter(|amount| *amount > Decimal::ZERO && *amount <= MAX_AMOUNT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn items(lines: &[(Decimal, Decimal)]) -> Vec<InvoiceItem> {
        let inputs: Vec<_> = lines
            .iter()
            .map(|(q, p)| CreateInvoiceItem::new("Line", *q, *p))
            .collect();
        price_items(Uuid::new_v4(), &inputs).unwrap()
    }

    #[test]
    fn sixteen_percent_vat_with_discount() {
        let items = items(&[(dec!(2), dec!(25000)), (dec!(1), dec!(5000))]);
        let totals = compute_totals(&items, dec!(16), dec!(5000)).unwrap();
        assert_eq!(totals.subtotal, dec!(55000.00));
        assert_eq!(totals.tax_amount, dec!(8800.00));
        assert_eq!(totals.total, dec!(58800.00));
    }

    #[test]
    fn tax_rate_and_discount_are_clamped() {
        let items = items(&[(dec!(1), dec!(100))]);
        let totals = compute_totals(&items, dec!(150), dec!(-20)).unwrap();
        assert_eq!(totals.tax_rate, dec!(100));
        assert_eq!(totals.discount, dec!(0));
        assert_eq!(totals.total, dec!(200.00));

        let totals = compute_totals(&items, dec!(-5), dec!(0)).unwrap();
        assert_eq!(totals.tax_rate, dec!(0));
    }

    #[test]
    fn discount_larger_than_invoice_floors_total_at_zero() {
        let items = items(&[(dec!(1), dec!(100))]);
        let totals = compute_totals(&items, dec!(0), dec!(250)).unwrap();
        assert_eq!(totals.total, dec!(0));
    }

    #[test]
    fn line_coercions() {
        let inputs = vec![
            CreateInvoiceItem::new("  ", dec!(2), dec!(-10)),
            CreateInvoiceItem::new("Consulting", dec!(1.5), dec!(0.333)),
        ];
        let items = price_items(Uuid::new_v4(), &inputs).unwrap();
        assert_eq!(items[0].description, "Item");
        assert_eq!(items[0].unit_price, dec!(0));
        assert_eq!(items[0].line_total, dec!(0));
        assert_eq!(items[1].line_total, dec!(0.50));
        assert_eq!(items[1].sort_order, 1);
    }

    #[test]
    fn negative_quantity_and_empty_lists_are_rejected() {
        let inputs = vec![CreateInvoiceItem::new("Refund", dec!(-1), dec!(10))];
        assert!(matches!(
            price_items(Uuid::new_v4(), &inputs),
            Err(InvoiceError::NegativeQuantity)
        ));
        assert!(matches!(
            price_items(Uuid::new_v4(), &[]),
            Err(InvoiceError::EmptyItems)
        ));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round2(dec!(0.125)), dec!(0.13));
        assert_eq!(round2(dec!(-0.125)), dec!(-0.13));
        assert_eq!(round2(dec!(2.344)), dec!(2.34));
    }

    #[test]
    fn late_fee_is_capped() {
        assert_eq!(late_fee(dec!(20000), dec!(5), dec!(5000)), dec!(1000.00));
        assert_eq!(late_fee(dec!(200000), dec!(5), dec!(5000)), dec!(5000));
        assert_eq!(late_fee(dec!(20000), dec!(0), dec!(5000)), dec!(0));
        assert_eq!(late_fee(dec!(0), dec!(5), dec!(5000)), dec!(0));
    }

    #[test]
    fn gateway_amounts_parse_leniently() {
        assert_eq!(parse_amount(" 1,500.50 "), Some(dec!(1500.50)));
        assert_eq!(parse_amount("250"), Some(dec!(250)));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("-10"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1000000000000000"), Some(MAX_AMOUNT));
        assert_eq!(parse_amount("1000000000000000.01"), None);
        assert_eq!(parse_amount("79228162514264337593543950335"), None);
    }

    #[test]
    fn bounds_are_the_documented_powers_of_ten() {
        assert_eq!(MAX_AMOUNT, dec!(1000000000000000));
        assert_eq!(MAX_QUANTITY, dec!(1000000000));
    }

    #[test]
    fn oversized_lines_are_rejected_not_overflowed() {
        let huge_price = vec![CreateInvoiceItem::new(
            "Line",
            dec!(1),
            dec!(79228162514264337593543950335),
        )];
        assert!(matches!(
            price_items(Uuid::new_v4(), &huge_price),
            Err(InvoiceError::AmountOutOfRange)
        ));

        let huge_quantity = vec![CreateInvoiceItem::new("Line", dec!(1000000001), dec!(1))];
        assert!(matches!(
            price_items(Uuid::new_v4(), &huge_quantity),
            Err(InvoiceError::AmountOutOfRange)
        ));

        let line_too_large = vec![CreateInvoiceItem::new("Line", dec!(1000000), dec!(10000000000))];
        assert!(matches!(
            price_items(Uuid::new_v4(), &line_too_large),
            Err(InvoiceError::AmountOutOfRange)
        ));

        let sum_too_large = vec![
            CreateInvoiceItem::new("A", dec!(1), dec!(600000000000000)),
            CreateInvoiceItem::new("B", dec!(1), dec!(600000000000000)),
        ];
        assert!(matches!(
            price_items(Uuid::new_v4(), &sum_too_large),
            Err(InvoiceError::AmountOutOfRange)
        ));
    }

    #[test]
    fn quantities_are_rounded_to_stored_scale_before_pricing() {
        let items = items(&[(dec!(1.23456), dec!(10))]);
        assert_eq!(items[0].quantity, dec!(1.2346));
        assert_eq!(items[0].line_total, dec!(12.35));

        let totals = compute_totals(&items, dec!(0), dec!(0)).unwrap();
        assert_eq!(totals.subtotal, items[0].line_total);
    }

    #[test]
    fn long_descriptions_are_rejected() {
        let inputs = vec![CreateInvoiceItem::new("x".repeat(501), dec!(1), dec!(1))];
        assert!(matches!(
            price_items(Uuid::new_v4(), &inputs),
            Err(InvoiceError::DescriptionTooLong { max: 500 })
        ));
        let inputs = vec![CreateInvoiceItem::new("x".repeat(500), dec!(1), dec!(1))];
        assert!(price_items(Uuid::new_v4(), &inputs).is_ok());
    }
}

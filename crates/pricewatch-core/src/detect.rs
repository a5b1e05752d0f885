use std::cmp::Ordering;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::{ChangeEvent, ChangeKind, Product, ProductId, Snapshot};

const PERCENT_SCALE: u32 = 4;

/// Classifies every product present in either `previous` or `current`.
///
/// A price change counts only when `|percent_change| >= threshold_percent`.
/// The result is ordered for presentation: new, decreases (largest drop
/// first), increases (largest rise first), removed, unchanged; ties by id.
pub fn detect(
    previous: &Snapshot,
    current: &BTreeMap<ProductId, Product>,
    threshold_percent: f64,
) -> Vec<ChangeEvent> {
    let threshold = threshold_decimal(threshold_percent);
    let mut events = Vec::with_capacity(current.len() + previous.products.len());

    for (id, product) in current {
        let event = match previous.products.get(id) {
            Some(old) => compare(old, product, threshold),
            None => new_event(product),
        };
        events.push(event);
    }

    for (id, old) in &previous.products {
        if !current.contains_key(id) {
            events.push(removed_event(old));
        }
    }

    events.sort_by(presentation_order);
    events
}

fn threshold_decimal(threshold_percent: f64) -> Decimal {
    if !threshold_percent.is_finite() || threshold_percent <= 0.0 {
        return Decimal::ZERO;
    }

    // Display gives the shortest round-trip text, so 0.1 stays 0.1.
    threshold_percent
        .to_string()
        .parse::<Decimal>()
        .unwrap_or(Decimal::MAX)
}

fn new_event(product: &Product) -> ChangeEvent {
    ChangeEvent {
        product_id: product.id.clone(),
        kind: ChangeKind::New,
        id_source: product.id_source,
        name: product.name.clone(),
        old_price: None,
        new_price: Some(product.price.clone()),
        percent_change: None,
        absolute_change: None,
        changed_fields: Vec::new(),
    }
}

fn removed_event(product: &Product) -> ChangeEvent {
    ChangeEvent {
        product_id: product.id.clone(),
        kind: ChangeKind::Removed,
        id_source: product.id_source,
        name: product.name.clone(),
        old_price: Some(product.price.clone()),
        new_price: None,
        percent_change: None,
        absolute_change: None,
        changed_fields: Vec::new(),
    }
}

fn compare(old: &Product, new: &Product, threshold: Decimal) -> ChangeEvent {
    let mut event = ChangeEvent {
        product_id: new.id.clone(),
        kind: ChangeKind::Unchanged,
        id_source: new.id_source,
        name: new.name.clone().or_else(|| old.name.clone()),
        old_price: Some(old.price.clone()),
        new_price: Some(new.price.clone()),
        percent_change: None,
        absolute_change: None,
        changed_fields: attribute_changes(old, new),
    };

    if old.price.currency != new.price.currency {
        tracing::debug!(
            product_id = %new.id,
            old = %old.price,
            new = %new.price,
            "currency changed, percent change not computed"
        );
        event.changed_fields.push("currency".to_owned());
        return event;
    }

    let old_amount = old.price.amount;
    let new_amount = new.price.amount;
    let delta = new_amount - old_amount;
    event.absolute_change = Some(delta);

    if old_amount.is_zero() {
        if !new_amount.is_zero() {
            event.kind = ChangeKind::PriceIncreased;
        }
        return event;
    }

    let percent = delta
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| scaled.checked_div(old_amount));

    // Classification uses the exact ratio; only the reported value is rounded.
    match percent {
        Some(percent) => {
            event.percent_change = percent.round_dp(PERCENT_SCALE).to_f64();
            if !percent.is_zero() && percent.abs() >= threshold {
                event.kind = if percent.is_sign_positive() {
                    ChangeKind::PriceIncreased
                } else {
                    ChangeKind::PriceDecreased
                };
            }
        }
        None if !delta.is_zero() => {
            event.kind = if delta.is_sign_positive() {
                ChangeKind::PriceIncreased
            } else {
                ChangeKind::PriceDecreased
            };
        }
        None => {}
    }

    event
}

fn attribute_changes(old: &Product, new: &Product) -> Vec<String> {
    let fields = [
        ("name", &old.name, &new.name),
        ("image_url", &old.image_url, &new.image_url),
        ("description", &old.description, &new.description),
        ("url", &old.url, &new.url),
        ("availability", &old.availability, &new.availability),
    ];

    fields
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(field, _, _)| field.to_owned())
        .collect()
}

fn presentation_order(a: &ChangeEvent, b: &ChangeEvent) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| match a.kind {
            ChangeKind::PriceDecreased => ascending_percent(a, b),
            ChangeKind::PriceIncreased => ascending_percent(b, a),
            _ => Ordering::Equal,
        })
        .then_with(|| a.product_id.cmp(&b.product_id))
}

/// A missing percentage means the baseline price was zero or the division
/// overflowed; it sorts as the most extreme movement in its direction.
fn ascending_percent(a: &ChangeEvent, b: &ChangeEvent) -> Ordering {
    let key = |event: &ChangeEvent| match (event.kind, event.percent_change) {
        (_, Some(percent)) => percent,
        (ChangeKind::PriceDecreased, None) => f64::NEG_INFINITY,
        (_, None) => f64::INFINITY,
    };
    key(a).total_cmp(&key(b))
}

use std::collections::HashMap;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;

/// One client-held cart line. Price is a point-in-time snapshot and is
/// revalidated against the catalog before it is trusted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    /// Product id
    pub id: Uuid,
    pub name: String,
    /// Unit price snapshot in minor units
    pub price: i64,
    pub quantity: i32,
    pub is_digital: bool,
    #[serde(default)]
    pub image: Option<String>,
}

/// Resolution for a cart line whose requested quantity exceeds available
/// stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StockAdjustment {
    pub product_id: Uuid,
    pub product_name: String,
    pub requested_quantity: i32,
    pub available_quantity: i32,
    pub action: StockAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StockAction {
    /// Quantity lowered to what is in stock
    Reduced,
    /// Product out of stock; line dropped
    Removed,
}

/// Outcome of validating a cart against current catalog state.
///
/// Hard errors (missing/inactive products, price drift) abort the whole
/// checkout. Stock issues are soft proposals the caller must confirm.
#[derive(Debug, Clone, Default)]
pub struct StockValidation {
    pub product_errors: Vec<String>,
    pub stock_issues: Vec<StockAdjustment>,
    /// Cart total in minor units after applying the proposed adjustments.
    pub adjusted_total: i64,
}

impl StockValidation {
    pub fn has_hard_errors(&self) -> bool {
        !self.product_errors.is_empty()
    }

    pub fn needs_confirmation(&self) -> bool {
        !self.stock_issues.is_empty()
    }
}

/// Validates cart lines against current product rows on the given
/// connection (a transaction handle during checkout). Products are fetched
/// in a single batch query.
pub async fn validate_cart<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLine],
) -> Result<StockValidation, ServiceError> {
    let ids: Vec<Uuid> = lines.iter().map(|line| line.id).collect();
    let products = ProductEntity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(conn)
        .await?;

    let by_id: HashMap<Uuid, product::Model> =
        products.into_iter().map(|p| (p.id, p)).collect();

    Ok(evaluate_lines(lines, &by_id))
}

/// Pure validation step, separated from the fetch for testability.
pub fn evaluate_lines(
    lines: &[CartLine],
    products: &HashMap<Uuid, product::Model>,
) -> StockValidation {
    let mut result = StockValidation::default();

    for line in lines {
        // Quantities come from client-held cart state; anything below one is
        // tampering, not a stock problem.
        if line.quantity < 1 {
            result
                .product_errors
                .push(format!("Invalid quantity for \"{}\"", line.name));
            continue;
        }

        let product = match products.get(&line.id) {
            Some(p) if p.is_active() => p,
            Some(p) => {
                result
                    .product_errors
                    .push(format!("\"{}\" is no longer available", p.name));
                continue;
            }
            None => {
                result
                    .product_errors
                    .push(format!("\"{}\" is no longer available", line.name));
                continue;
            }
        };

        if product.price != line.price {
            result.product_errors.push(format!(
                "Price of \"{}\" has changed; refresh your cart",
                product.name
            ));
            continue;
        }

        match product.stock {
            Some(0) => {
                result.stock_issues.push(StockAdjustment {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    requested_quantity: line.quantity,
                    available_quantity: 0,
                    action: StockAction::Removed,
                });
            }
            Some(stock) if stock < line.quantity => {
                result.stock_issues.push(StockAdjustment {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    requested_quantity: line.quantity,
                    available_quantity: stock,
                    action: StockAction::Reduced,
                });
                result.adjusted_total += product.price * i64::from(stock);
            }
            _ => {
                result.adjusted_total += product.price * i64::from(line.quantity);
            }
        }
    }

    result
}

/// Applies proposed adjustments to the cart: reduced lines get the available
/// quantity, removed lines are dropped. Lines without an adjustment pass
/// through unchanged.
pub fn apply_adjustments(lines: Vec<CartLine>, issues: &[StockAdjustment]) -> Vec<CartLine> {
    let by_product: HashMap<Uuid, &StockAdjustment> =
        issues.iter().map(|a| (a.product_id, a)).collect();

    lines
        .into_iter()
        .filter_map(|mut line| match by_product.get(&line.id) {
            Some(adjustment) => match adjustment.action {
                StockAction::Removed => None,
                StockAction::Reduced => {
                    line.quantity = adjustment.available_quantity;
                    Some(line)
                }
            },
            None => Some(line),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(id: Uuid, price: i64, stock: Option<i32>, status: &str) -> product::Model {
        product::Model {
            id,
            name: format!("product-{}", &id.to_string()[..8]),
            price,
            compare_at_price: None,
            stock,
            is_digital: stock.is_none(),
            status: status.to_string(),
            images: serde_json::json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(product: &product::Model, quantity: i32) -> CartLine {
        CartLine {
            id: product.id,
            name: product.name.clone(),
            price: product.price,
            quantity,
            is_digital: product.is_digital,
            image: None,
        }
    }

    fn catalog(products: &[product::Model]) -> HashMap<Uuid, product::Model> {
        products.iter().cloned().map(|p| (p.id, p)).collect()
    }

    #[test]
    fn archived_product_is_a_hard_error_while_others_validate() {
        let active = product(Uuid::new_v4(), 1000, Some(5), "active");
        let archived = product(Uuid::new_v4(), 2000, Some(5), "archived");
        let lines = vec![line(&active, 2), line(&archived, 1)];

        let result = evaluate_lines(&lines, &catalog(&[active, archived]));
        assert!(result.has_hard_errors());
        assert_eq!(result.product_errors.len(), 1);
        // The active line is still priced in.
        assert_eq!(result.adjusted_total, 2000);
    }

    #[test]
    fn non_positive_quantity_is_a_hard_error() {
        let p = product(Uuid::new_v4(), 1000, Some(5), "active");

        for quantity in [0, -3] {
            let result = evaluate_lines(&[line(&p, quantity)], &catalog(&[p.clone()]));
            assert!(result.has_hard_errors());
            assert!(result.product_errors[0].contains("quantity"));
            assert_eq!(result.adjusted_total, 0);
        }
    }

    #[test]
    fn stale_price_is_a_hard_error() {
        let p = product(Uuid::new_v4(), 1000, Some(5), "active");
        let mut l = line(&p, 1);
        l.price = 900;

        let result = evaluate_lines(&[l], &catalog(&[p]));
        assert!(result.has_hard_errors());
        assert!(result.product_errors[0].contains("changed"));
    }

    #[test]
    fn insufficient_stock_proposes_reduction() {
        let p = product(Uuid::new_v4(), 500, Some(2), "active");
        let result = evaluate_lines(&[line(&p, 5)], &catalog(&[p.clone()]));

        assert!(!result.has_hard_errors());
        assert!(result.needs_confirmation());
        let issue = &result.stock_issues[0];
        assert_eq!(issue.action, StockAction::Reduced);
        assert_eq!(issue.available_quantity, 2);
        assert_eq!(result.adjusted_total, 1000);
    }

    #[test]
    fn zero_stock_proposes_removal() {
        let p = product(Uuid::new_v4(), 500, Some(0), "active");
        let result = evaluate_lines(&[line(&p, 1)], &catalog(&[p.clone()]));

        assert_eq!(result.stock_issues[0].action, StockAction::Removed);
        assert_eq!(result.adjusted_total, 0);
    }

    #[test]
    fn unlimited_stock_passes_through() {
        let p = product(Uuid::new_v4(), 750, None, "active");
        let result = evaluate_lines(&[line(&p, 4)], &catalog(&[p.clone()]));

        assert!(!result.has_hard_errors());
        assert!(!result.needs_confirmation());
        assert_eq!(result.adjusted_total, 3000);
    }

    #[test]
    fn apply_adjustments_reduces_and_removes() {
        let keep = product(Uuid::new_v4(), 100, Some(10), "active");
        let reduce = product(Uuid::new_v4(), 200, Some(2), "active");
        let remove = product(Uuid::new_v4(), 300, Some(0), "active");
        let lines = vec![line(&keep, 1), line(&reduce, 5), line(&remove, 1)];

        let result = evaluate_lines(&lines, &catalog(&[keep.clone(), reduce.clone(), remove]));
        let adjusted = apply_adjustments(lines, &result.stock_issues);

        assert_eq!(adjusted.len(), 2);
        assert_eq!(adjusted[0].id, keep.id);
        assert_eq!(adjusted[0].quantity, 1);
        assert_eq!(adjusted[1].id, reduce.id);
        assert_eq!(adjusted[1].quantity, 2);
    }
}

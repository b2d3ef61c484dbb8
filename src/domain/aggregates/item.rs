//! Catalog item

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::domain::value_objects::{Category, ItemId, Label, Money, Slug};

const TITLE_MAX_LEN: usize = 100;
const DEFAULT_DESCRIPTION: &str = "this is a test description";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Item {
    pub(crate) id: ItemId,
    pub(crate) title: String,
    pub(crate) price: Money,
    pub(crate) discount_price: Option<Money>,
    pub(crate) category: Category,
    pub(crate) label: Label,
    pub(crate) slug: Slug,
    pub(crate) description: String,
    pub(crate) images: [String; 4],
    pub(crate) created_at: DateTime<Utc>,
}

impl Item {
    pub fn create(title: impl Into<String>, slug: Slug, price: Money, category: Category) -> Result<Self, ItemError> {
        let title = title.into().trim().to_string();
        if title.is_empty() { return Err(ItemError::MissingTitle); }
        if title.chars().count() > TITLE_MAX_LEN { return Err(ItemError::TitleTooLong); }
        if price.is_negative() { return Err(ItemError::NegativePrice); }
        Ok(Self {
            id: ItemId::new(), title, price, discount_price: None, category, label: Label::default(), slug,
            description: DEFAULT_DESCRIPTION.to_string(), images: Default::default(), created_at: Utc::now(),
        })
    }

    pub fn with_discount(mut self, discount_price: Money) -> Result<Self, ItemError> {
        if discount_price.is_negative() || discount_price >= self.price {
            return Err(ItemError::DiscountNotBelowPrice { price: self.price, discount: discount_price });
        }
        self.discount_price = Some(discount_price);
        Ok(self)
    }

    pub fn with_label(mut self, label: Label) -> Self { self.label = label; self }
    pub fn with_description(mut self, description: impl Into<String>) -> Self { self.description = description.into(); self }
    pub fn with_images(mut self, images: [String; 4]) -> Self { self.images = images; self }

    pub fn id(&self) -> ItemId { self.id }
    pub fn title(&self) -> &str { &self.title }
    pub fn price(&self) -> Money { self.price }
    pub fn discount_price(&self) -> Option<Money> { self.discount_price }
    pub fn category(&self) -> Category { self.category }
    pub fn label(&self) -> Label { self.label }
    pub fn slug(&self) -> &Slug { &self.slug }
    pub fn description(&self) -> &str { &self.description }
    pub fn images(&self) -> &[String; 4] { &self.images }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// Price a single unit sells for.
    pub fn unit_price(&self) -> Money { self.discount_price.unwrap_or(self.price) }

    pub fn absolute_url(&self) -> String { format!("/product/{}", self.slug) }
    pub fn add_to_cart_url(&self) -> String { format!("/add-to-cart/{}", self.slug) }
    pub fn remove_from_cart_url(&self) -> String { format!("/remove-from-cart/{}", self.slug) }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ItemError {
    #[error("item title is required")]
    MissingTitle,
    #[error("item title is longer than 100 characters")]
    TitleTooLong,
    #[error("item price cannot be negative")]
    NegativePrice,
    #[error("discount price {discount} must be below price {price}")]
    DiscountNotBelowPrice { price: Money, discount: Money },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guitar() -> Item {
        Item::create("Yamaha F310", Slug::new("yamaha-f310").unwrap(), Money::from_cents(12000), Category::Guitar).unwrap()
    }

    #[test]
    fn test_item_create() {
        let item = guitar();
        assert_eq!(item.title(), "Yamaha F310");
        assert_eq!(item.label(), Label::Primary);
        assert_eq!(item.unit_price(), Money::from_cents(12000));
        assert_eq!(item.add_to_cart_url(), "/add-to-cart/yamaha-f310");
    }

    #[test]
    fn test_discount_must_be_below_price() {
        let item = guitar().with_discount(Money::from_cents(9900)).unwrap();
        assert_eq!(item.unit_price(), Money::from_cents(9900));
        assert!(matches!(guitar().with_discount(Money::from_cents(12000)), Err(ItemError::DiscountNotBelowPrice { .. })));
        assert!(guitar().with_discount(Money::from_cents(-1)).is_err());
    }

    #[test]
    fn test_rejects_bad_catalog_data() {
        let slug = Slug::new("x").unwrap();
        assert_eq!(Item::create("  ", slug.clone(), Money::ZERO, Category::Drum), Err(ItemError::MissingTitle));
        assert_eq!(Item::create("Drum", slug, Money::from_cents(-100), Category::Drum), Err(ItemError::NegativePrice));
    }
}

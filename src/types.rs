//! Core types for the cart store.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier of a product line in the cart.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        ItemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

/// Mutation counter for a cart store.
///
/// Bumped once per applied mutation; events and persisted writes carry the
/// revision they reflect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(pub u64);

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

/// One product line in the cart.
///
/// Serialized as `{id?, title, image_url, price, quantity}`. The quantity is
/// read leniently: integers, floats and numeric strings are all accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Absent only for items that were never given an identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    pub title: String,
    pub image_url: String,
    pub price: f64,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub quantity: u32,
}

impl CartItem {
    /// Create an item with an identifier and zero quantity.
    pub fn new(
        id: impl Into<ItemId>,
        title: impl Into<String>,
        image_url: impl Into<String>,
        price: f64,
    ) -> Self {
        Self {
            id: Some(id.into()),
            title: title.into(),
            image_url: image_url.into(),
            price,
            quantity: 0,
        }
    }

    /// Create an item without an identifier.
    pub fn without_id(title: impl Into<String>, image_url: impl Into<String>, price: f64) -> Self {
        Self {
            id: None,
            title: title.into(),
            image_url: image_url.into(),
            price,
            quantity: 0,
        }
    }

    /// Check whether this item carries the given identifier.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_ref().is_some_and(|own| own.as_str() == id)
    }

    /// Price of the whole line.
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// Aggregates over the current cart contents.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CartTotals {
    /// Number of product lines, including lines at quantity zero.
    pub distinct_items: usize,
    /// Sum of all quantities.
    pub total_quantity: u64,
    /// Sum of price times quantity.
    pub subtotal: f64,
}

impl CartTotals {
    pub fn from_items(items: &[CartItem]) -> Self {
        items.iter().fold(
            CartTotals {
                distinct_items: items.len(),
                ..Default::default()
            },
            |mut acc, item| {
                acc.total_quantity += u64::from(item.quantity);
                acc.subtotal += item.line_total();
                acc
            },
        )
    }
}

/// Quantity as it may appear in stored data.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

fn clamp_float(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.trunc().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

fn deserialize_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawQuantity>::deserialize(deserializer)?;
    Ok(match raw {
        None => 0,
        Some(RawQuantity::Unsigned(n)) => u32::try_from(n).unwrap_or(u32::MAX),
        Some(RawQuantity::Signed(n)) => u32::try_from(n.max(0)).unwrap_or(u32::MAX),
        Some(RawQuantity::Float(f)) => clamp_float(f),
        Some(RawQuantity::Text(s)) => {
            let parsed: f64 = s.trim().parse().map_err(|_| {
                <D::Error as serde::de::Error>::custom(format!("invalid quantity: {:?}", s))
            })?;
            clamp_float(parsed)
        }
    })
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// The identifier the server assigns to a car
pub type CarId = i64;

/// A car as exchanged with the cars API
///
/// A car constructed locally has no `id` until the server has accepted it.
/// Anything fetched from the server carries the id it was assigned.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Car {
    /// The server-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CarId>,
    /// The car's model name
    pub name: String,
    /// The car's color
    pub color: String,
    /// The asking price
    pub price: f64,
}

impl Car {
    /// Constructs a car that has not yet been sent to the server
    pub fn new(name: impl Into<String>, color: impl Into<String>, price: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            color: color.into(),
            price,
        }
    }

    /// Whether the server has assigned this car an id
    #[inline]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for Car {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.id {
            write!(f, "[{id}] ")?;
        }
        write!(f, "{} - {} | Price: {}", self.name, self.color, self.price)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_car_is_sent_without_id() {
        let car = Car::new("Civic", "blue", 20000.0);
        let value = serde_json::to_value(&car).unwrap();
        assert_eq!(
            value,
            json!({ "name": "Civic", "color": "blue", "price": 20000.0 })
        );
        assert!(!car.is_persisted());
    }

    #[test]
    fn server_car_with_integer_price_is_accepted() {
        let car: Car = serde_json::from_value(
            json!({ "id": 7, "name": "Audi", "color": "white", "price": 22000000 }),
        )
        .unwrap();
        assert_eq!(car.id, Some(7));
        assert_eq!(car.price, 22_000_000.0);
        assert!(car.is_persisted());
    }

    #[test]
    fn displays_like_a_list_entry() {
        let mut car = Car::new("BMW", "black", 24500.0);
        assert_eq!(car.to_string(), "BMW - black | Price: 24500");
        car.id = Some(3);
        assert_eq!(car.to_string(), "[3] BMW - black | Price: 24500");
    }
}

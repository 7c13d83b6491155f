use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic dish natural-key ids
const DISH_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_6e75_6361_7264_6469_7368_6b65_7931);

/// Current calendar date used for created/modified stamps
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Core dish model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub time_minutes: i32,
    pub vegetarian: bool,
    pub created_date: NaiveDate,
    pub modified_date: NaiveDate,
    pub image: Option<String>,
}

/// The full field tuple that identifies a dish during reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DishFields {
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub time_minutes: i32,
    pub vegetarian: bool,
}

/// Dish description as received from clients, either standalone or embedded in a menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub time_minutes: i32,
    pub vegetarian: bool,
}

/// Request model for creating a dish
pub type CreateDishRequest = DishPayload;

/// Request model for updating a dish; absent fields are left untouched
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateDishRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub time_minutes: Option<i32>,
    pub vegetarian: Option<bool>,
}

/// Response model for a dish with the image resolved to a URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub time_minutes: i32,
    pub vegetarian: bool,
    pub created_date: NaiveDate,
    pub modified_date: NaiveDate,
    pub image: Option<String>,
}

/// Response model for dish listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DishListResponse {
    pub dishes: Vec<DishResponse>,
    pub total_count: usize,
}

/// Prices are stored with exactly two fractional digits
pub fn normalize_price(price: Decimal) -> Decimal {
    let mut normalized = price;
    normalized.rescale(2);
    normalized
}

impl DishFields {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        price: Decimal,
        time_minutes: i32,
        vegetarian: bool,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            price: normalize_price(price),
            time_minutes,
            vegetarian,
        }
    }

    /// Canonical text form of the tuple; equal tuples always yield equal keys
    pub fn natural_key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.title,
            self.description,
            normalize_price(self.price),
            self.time_minutes,
            self.vegetarian
        )
    }

    /// Deterministic UUIDv5 of the natural key, used as a storage guard key
    pub fn key_id(&self) -> Uuid {
        Uuid::new_v5(&DISH_KEY_NAMESPACE, self.natural_key().as_bytes())
    }
}

impl From<DishPayload> for DishFields {
    fn from(payload: DishPayload) -> Self {
        DishFields::new(
            payload.title,
            payload.description,
            payload.price,
            payload.time_minutes,
            payload.vegetarian,
        )
    }
}

impl From<DishPayload> for UpdateDishRequest {
    fn from(payload: DishPayload) -> Self {
        UpdateDishRequest {
            title: Some(payload.title),
            description: Some(payload.description),
            price: Some(payload.price),
            time_minutes: Some(payload.time_minutes),
            vegetarian: Some(payload.vegetarian),
        }
    }
}

impl Dish {
    /// Create a new Dish with a generated ID and today's dates
    pub fn new(fields: DishFields) -> Self {
        let now = today();
        Self {
            id: format!(
                "D{}",
                Uuid::new_v4()
                    .simple()
                    .to_string()
                    .get(0..8)
                    .unwrap_or("00000000")
            ),
            title: fields.title,
            description: fields.description,
            price: normalize_price(fields.price),
            time_minutes: fields.time_minutes,
            vegetarian: fields.vegetarian,
            created_date: now,
            modified_date: now,
            image: None,
        }
    }

    /// The natural key of this dish
    pub fn fields(&self) -> DishFields {
        DishFields::new(
            self.title.clone(),
            self.description.clone(),
            self.price,
            self.time_minutes,
            self.vegetarian,
        )
    }

    /// Apply an update request and refresh the modified date
    pub fn update(&mut self, request: UpdateDishRequest) {
        if let Some(title) = request.title {
            self.title = title;
        }
        if let Some(description) = request.description {
            self.description = description;
        }
        if let Some(price) = request.price {
            self.price = normalize_price(price);
        }
        if let Some(time_minutes) = request.time_minutes {
            self.time_minutes = time_minutes;
        }
        if let Some(vegetarian) = request.vegetarian {
            self.vegetarian = vegetarian;
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.modified_date = today();
    }

    /// Set the stored image path
    pub fn set_image(&mut self, image_path: String) {
        self.image = Some(image_path);
        self.touch();
    }

    /// Convert Dish to DishResponse with the image path joined onto the media URL
    pub fn to_response(&self, media_url: &str) -> DishResponse {
        let image = self.image.as_ref().map(|path| {
            if media_url.is_empty() {
                path.clone()
            } else {
                format!("{}/{}", media_url.trim_end_matches('/'), path)
            }
        });

        DishResponse {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            price: self.price,
            time_minutes: self.time_minutes,
            vegetarian: self.vegetarian,
            created_date: self.created_date,
            modified_date: self.modified_date,
            image,
        }
    }

    /// Whether the dish was created or modified on the given day
    pub fn changed_on(&self, date: NaiveDate) -> bool {
        self.created_date == date || self.modified_date == date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn meatballs() -> DishFields {
        DishFields::new("Meatballs", "", dec!(6.50), 30, false)
    }

    #[test]
    fn test_dish_creation() {
        let dish = Dish::new(meatballs());

        assert!(dish.id.starts_with('D'));
        assert_eq!(dish.id.len(), 9);
        assert_eq!(dish.title, "Meatballs");
        assert_eq!(dish.created_date, today());
        assert_eq!(dish.modified_date, today());
        assert!(dish.image.is_none());
    }

    #[test]
    fn test_price_normalization_in_natural_key() {
        let a = DishFields::new("Soup", "", dec!(5), 10, true);
        let b = DishFields::new("Soup", "", dec!(5.00), 10, true);

        assert_eq!(a, b);
        assert_eq!(a.natural_key(), b.natural_key());
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.price.to_string(), "5.00");
    }

    #[test]
    fn test_natural_key_covers_every_field() {
        let base = meatballs();

        let mut other_price = base.clone();
        other_price.price = dec!(7.00);
        let mut other_time = base.clone();
        other_time.time_minutes = 31;
        let mut other_flag = base.clone();
        other_flag.vegetarian = true;
        let mut other_description = base.clone();
        other_description.description = "With sauce".to_string();

        for variant in [other_price, other_time, other_flag, other_description] {
            assert_ne!(variant.natural_key(), base.natural_key());
            assert_ne!(variant.key_id(), base.key_id());
        }
    }

    #[test]
    fn test_dish_update_keeps_created_date() {
        let mut dish = Dish::new(meatballs());
        let created = dish.created_date;

        dish.update(UpdateDishRequest {
            title: Some("Swedish meatballs".to_string()),
            price: Some(dec!(7)),
            ..Default::default()
        });

        assert_eq!(dish.title, "Swedish meatballs");
        assert_eq!(dish.price.to_string(), "7.00");
        assert_eq!(dish.time_minutes, 30);
        assert_eq!(dish.created_date, created);
        assert_eq!(dish.modified_date, today());
    }

    #[test]
    fn test_to_response_joins_media_url() {
        let mut dish = Dish::new(meatballs());
        assert_eq!(dish.to_response("/media").image, None);

        dish.set_image("uploads/dish/abc.png".to_string());

        assert_eq!(
            dish.to_response("/media/").image.as_deref(),
            Some("/media/uploads/dish/abc.png")
        );
        assert_eq!(
            dish.to_response("").image.as_deref(),
            Some("uploads/dish/abc.png")
        );
    }

    #[test]
    fn test_payload_description_defaults_to_empty() {
        let payload: DishPayload = serde_json::from_str(
            r#"{"title":"A","price":"5.00","time_minutes":30,"vegetarian":false}"#,
        )
        .unwrap();

        assert_eq!(payload.description, "");
        let fields: DishFields = payload.into();
        assert_eq!(fields.price, dec!(5.00));
    }

    #[test]
    fn test_changed_on() {
        let mut dish = Dish::new(meatballs());
        let yesterday = today().pred_opt().unwrap();
        dish.created_date = yesterday;
        dish.modified_date = yesterday;

        assert!(dish.changed_on(yesterday));
        assert!(!dish.changed_on(today()));
    }
}

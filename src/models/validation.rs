use rust_decimal::Decimal;

use super::{
    CreateMenuRequest, DishPayload, UpdateDishRequest, UpdateMenuRequest, ValidationError,
    ValidationResult,
};

/// Trait for validating input models
pub trait Validate {
    fn validate(&self) -> ValidationResult<()>;
}

/// Validation constants
pub const MAX_TITLE_LENGTH: usize = 255;
pub const MAX_PRICE_SCALE: u32 = 2;
pub const MIN_PRICE: Decimal = Decimal::from_parts(0, 0, 0, false, 2); // 0.00
pub const MAX_PRICE: Decimal = Decimal::from_parts(99999, 0, 0, false, 2); // 999.99
pub const MAX_DISHES_PER_REQUEST: usize = 100;

impl Validate for DishPayload {
    fn validate(&self) -> ValidationResult<()> {
        validate_title("title", &self.title)?;
        validate_price("price", &self.price)?;
        validate_time_minutes("time_minutes", self.time_minutes)?;
        Ok(())
    }
}

impl Validate for UpdateDishRequest {
    fn validate(&self) -> ValidationResult<()> {
        if let Some(title) = &self.title {
            validate_title("title", title)?;
        }
        if let Some(price) = &self.price {
            validate_price("price", price)?;
        }
        if let Some(time_minutes) = self.time_minutes {
            validate_time_minutes("time_minutes", time_minutes)?;
        }
        Ok(())
    }
}

impl Validate for CreateMenuRequest {
    fn validate(&self) -> ValidationResult<()> {
        validate_title("title", &self.title)?;
        validate_dish_payloads(&self.dishes)?;
        Ok(())
    }
}

impl Validate for UpdateMenuRequest {
    fn validate(&self) -> ValidationResult<()> {
        if let Some(title) = &self.title {
            validate_title("title", title)?;
        }
        if let Some(dishes) = &self.dishes {
            validate_dish_payloads(dishes)?;
        }
        Ok(())
    }
}

/// Validate a menu or dish title
pub fn validate_title(field: &str, title: &str) -> ValidationResult<()> {
    if title.trim().is_empty() {
        return Err(ValidationError::RequiredField {
            field: field.to_string(),
        });
    }

    let length = title.chars().count();
    if length > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max_length: MAX_TITLE_LENGTH,
            actual_length: length,
        });
    }

    if title
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
    {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: title.to_string(),
            reason: "Contains invalid control characters".to_string(),
        });
    }

    Ok(())
}

/// Validate a dish price: non-negative, below 1000 and at most two decimal places
pub fn validate_price(field: &str, price: &Decimal) -> ValidationResult<()> {
    if *price < MIN_PRICE || *price > MAX_PRICE {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: MIN_PRICE.to_string(),
            max: MAX_PRICE.to_string(),
            value: price.to_string(),
        });
    }

    if price.normalize().scale() > MAX_PRICE_SCALE {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: price.to_string(),
            reason: "Price cannot have more than 2 decimal places".to_string(),
        });
    }

    Ok(())
}

/// Validate preparation time in minutes
pub fn validate_time_minutes(field: &str, time_minutes: i32) -> ValidationResult<()> {
    if time_minutes < 0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: time_minutes.to_string(),
            reason: "Preparation time cannot be negative".to_string(),
        });
    }

    Ok(())
}

/// Validate every embedded dish payload, reporting the offending index
pub fn validate_dish_payloads(dishes: &[DishPayload]) -> ValidationResult<()> {
    if dishes.len() > MAX_DISHES_PER_REQUEST {
        return Err(ValidationError::OutOfRange {
            field: "dishes".to_string(),
            min: "0".to_string(),
            max: MAX_DISHES_PER_REQUEST.to_string(),
            value: dishes.len().to_string(),
        });
    }

    for (index, dish) in dishes.iter().enumerate() {
        let field = |name: &str| format!("dishes[{}].{}", index, name);
        validate_title(&field("title"), &dish.title)?;
        validate_price(&field("price"), &dish.price)?;
        validate_time_minutes(&field("time_minutes"), dish.time_minutes)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payload(title: &str, price: Decimal, time_minutes: i32) -> DishPayload {
        DishPayload {
            title: title.to_string(),
            description: String::new(),
            price,
            time_minutes,
            vegetarian: false,
        }
    }

    #[test]
    fn test_validate_title() {
        assert!(validate_title("title", "Monday menu").is_ok());
        assert!(validate_title("title", &"a".repeat(MAX_TITLE_LENGTH)).is_ok());

        assert!(validate_title("title", "").is_err());
        assert!(validate_title("title", "   ").is_err());
        assert!(validate_title("title", &"a".repeat(MAX_TITLE_LENGTH + 1)).is_err());
        assert!(validate_title("title", "Menu\x00card").is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price("price", &dec!(0.00)).is_ok());
        assert!(validate_price("price", &dec!(5)).is_ok());
        assert!(validate_price("price", &dec!(12.50)).is_ok());
        assert!(validate_price("price", &dec!(999.99)).is_ok());
        // Trailing zeros beyond two places are still a two-place price
        assert!(validate_price("price", &dec!(4.500)).is_ok());

        assert!(validate_price("price", &dec!(-0.01)).is_err());
        assert!(validate_price("price", &dec!(1000.00)).is_err());
        assert!(validate_price("price", &dec!(1.234)).is_err());
    }

    #[test]
    fn test_validate_time_minutes() {
        assert!(validate_time_minutes("time_minutes", 0).is_ok());
        assert!(validate_time_minutes("time_minutes", 90).is_ok());

        let err = validate_time_minutes("time_minutes", -10).unwrap_err();
        assert_eq!(err.field(), "time_minutes");
    }

    #[test]
    fn test_dish_payload_errors_report_index() {
        let dishes = vec![
            payload("Meatballs", dec!(6.50), 30),
            payload("Soup", dec!(4.00), -10),
        ];

        let err = validate_dish_payloads(&dishes).unwrap_err();
        assert_eq!(err.field(), "dishes[1].time_minutes");
    }

    #[test]
    fn test_create_menu_request_validation() {
        let valid_request = CreateMenuRequest {
            title: "Menu card 1".to_string(),
            description: String::new(),
            dishes: vec![payload("A", dec!(5.00), 30)],
        };
        assert!(valid_request.validate().is_ok());

        let invalid_request = CreateMenuRequest {
            title: "".to_string(),
            ..valid_request.clone()
        };
        assert!(invalid_request.validate().is_err());

        let invalid_dish = CreateMenuRequest {
            dishes: vec![payload("", dec!(5.00), 30)],
            ..valid_request
        };
        assert!(invalid_dish.validate().is_err());
    }

    #[test]
    fn test_update_requests_skip_absent_fields() {
        assert!(UpdateMenuRequest::default().validate().is_ok());
        assert!(UpdateDishRequest::default().validate().is_ok());

        let bad = UpdateDishRequest {
            price: Some(dec!(0.001)),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}

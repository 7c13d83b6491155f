use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{today, DishPayload, DishResponse, ValidationError};

/// Core menu model; `dishes` holds the ids of the associated dishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_date: NaiveDate,
    pub modified_date: NaiveDate,
    #[serde(default)]
    pub dishes: BTreeSet<String>,
}

/// Request model for creating a menu together with its dishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMenuRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dishes: Vec<DishPayload>,
}

/// Request model for a full menu update (PUT)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceMenuRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub dishes: Option<Vec<DishPayload>>,
}

/// Request model for a partial menu update (PATCH).
///
/// `dishes: None` leaves the association alone, `Some(vec![])` empties it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMenuRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub dishes: Option<Vec<DishPayload>>,
}

/// Filters for querying menus; all criteria are AND-combined and date bounds are inclusive
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MenuFilters {
    pub title: Option<String>,
    pub created_from: Option<NaiveDate>,
    pub created_to: Option<NaiveDate>,
    pub modified_from: Option<NaiveDate>,
    pub modified_to: Option<NaiveDate>,
}

/// Query string accepted by the menu listing endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuListQuery {
    pub title: Option<String>,
    pub created_from: Option<NaiveDate>,
    pub created_to: Option<NaiveDate>,
    pub modified_from: Option<NaiveDate>,
    pub modified_to: Option<NaiveDate>,
    pub ordering: Option<String>,
}

/// Supported orderings for the menu listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MenuOrdering {
    #[default]
    TitleAsc,
    TitleDesc,
    DishCountAsc,
    DishCountDesc,
}

/// Menu listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub dish_count: usize,
    pub created_date: NaiveDate,
    pub modified_date: NaiveDate,
}

/// Response model for menu listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuListResponse {
    pub menus: Vec<MenuSummary>,
    pub total_count: usize,
}

/// Menu detail with its dishes expanded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_date: NaiveDate,
    pub modified_date: NaiveDate,
    pub dish_count: usize,
    pub dishes: Vec<DishResponse>,
}

impl From<ReplaceMenuRequest> for UpdateMenuRequest {
    fn from(request: ReplaceMenuRequest) -> Self {
        UpdateMenuRequest {
            title: Some(request.title),
            description: Some(request.description),
            dishes: request.dishes,
        }
    }
}

impl MenuListQuery {
    /// Split the query into filters and the requested ordering
    pub fn into_parts(self) -> Result<(MenuFilters, MenuOrdering), ValidationError> {
        let ordering = match self.ordering.as_deref().map(str::trim) {
            None | Some("") => MenuOrdering::default(),
            Some(key) => key.parse()?,
        };

        let filters = MenuFilters {
            title: self.title,
            created_from: self.created_from,
            created_to: self.created_to,
            modified_from: self.modified_from,
            modified_to: self.modified_to,
        };

        Ok((filters, ordering))
    }
}

impl FromStr for MenuOrdering {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(MenuOrdering::TitleAsc),
            "-title" => Ok(MenuOrdering::TitleDesc),
            "dish_count" => Ok(MenuOrdering::DishCountAsc),
            "-dish_count" => Ok(MenuOrdering::DishCountDesc),
            other => Err(ValidationError::InvalidValue {
                field: "ordering".to_string(),
                value: other.to_string(),
                reason: "Expected one of: title, -title, dish_count, -dish_count".to_string(),
            }),
        }
    }
}

impl fmt::Display for MenuOrdering {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let key = match self {
            MenuOrdering::TitleAsc => "title",
            MenuOrdering::TitleDesc => "-title",
            MenuOrdering::DishCountAsc => "dish_count",
            MenuOrdering::DishCountDesc => "-dish_count",
        };
        write!(f, "{}", key)
    }
}

impl MenuOrdering {
    /// Compare two menus; dish-count ties fall back to title ascending
    pub fn compare(&self, a: &Menu, b: &Menu) -> Ordering {
        match self {
            MenuOrdering::TitleAsc => a.title.cmp(&b.title),
            MenuOrdering::TitleDesc => b.title.cmp(&a.title),
            MenuOrdering::DishCountAsc => a
                .dish_count()
                .cmp(&b.dish_count())
                .then_with(|| a.title.cmp(&b.title)),
            MenuOrdering::DishCountDesc => b
                .dish_count()
                .cmp(&a.dish_count())
                .then_with(|| a.title.cmp(&b.title)),
        }
    }

    pub fn sort(&self, menus: &mut [Menu]) {
        menus.sort_by(|a, b| self.compare(a, b));
    }
}

impl MenuFilters {
    /// Whether no criterion is set
    pub fn is_empty(&self) -> bool {
        self.title.as_deref().map_or(true, |t| t.trim().is_empty())
            && self.created_from.is_none()
            && self.created_to.is_none()
            && self.modified_from.is_none()
            && self.modified_to.is_none()
    }
}

impl Menu {
    /// Create a new Menu with a generated ID, today's dates and no dishes
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = today();
        Self {
            id: format!(
                "M{}",
                Uuid::new_v4()
                    .simple()
                    .to_string()
                    .get(0..8)
                    .unwrap_or("00000000")
            ),
            title: title.into(),
            description: description.into(),
            created_date: now,
            modified_date: now,
            dishes: BTreeSet::new(),
        }
    }

    /// Live size of the dish association
    pub fn dish_count(&self) -> usize {
        self.dishes.len()
    }

    pub fn touch(&mut self) {
        self.modified_date = today();
    }

    /// Apply title/description changes and refresh the modified date
    pub fn update(&mut self, request: &UpdateMenuRequest) {
        if let Some(title) = &request.title {
            self.title = title.clone();
        }
        if let Some(description) = &request.description {
            self.description = description.clone();
        }
        self.touch();
    }

    /// Check if the menu matches the given filters
    pub fn matches_filters(&self, filters: &MenuFilters) -> bool {
        if let Some(title) = &filters.title {
            let needle = title.trim().to_lowercase();
            if !needle.is_empty() && !self.title.to_lowercase().contains(&needle) {
                return false;
            }
        }

        if let Some(from) = filters.created_from {
            if self.created_date < from {
                return false;
            }
        }

        if let Some(to) = filters.created_to {
            if self.created_date > to {
                return false;
            }
        }

        if let Some(from) = filters.modified_from {
            if self.modified_date < from {
                return false;
            }
        }

        if let Some(to) = filters.modified_to {
            if self.modified_date > to {
                return false;
            }
        }

        true
    }

    pub fn to_summary(&self) -> MenuSummary {
        MenuSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            dish_count: self.dish_count(),
            created_date: self.created_date,
            modified_date: self.modified_date,
        }
    }

    /// Convert Menu to MenuResponse using the already resolved dishes
    pub fn to_response(&self, dishes: Vec<DishResponse>) -> MenuResponse {
        MenuResponse {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            created_date: self.created_date,
            modified_date: self.modified_date,
            dish_count: dishes.len(),
            dishes,
        }
    }
}

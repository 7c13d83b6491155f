#[cfg(test)]
mod repository_tests {
    use crate::models::{today, Dish, DishFields, Menu, MenuFilters, RepositoryError};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    use crate::repositories::{DishRepository, InMemoryStore, MenuRepository};

    fn repos() -> (Arc<dyn DishRepository>, Arc<dyn MenuRepository>) {
        let store = InMemoryStore::new();
        (Arc::new(store.clone()), Arc::new(store))
    }

    fn meatballs() -> DishFields {
        DishFields::new("Meatballs", "", dec!(6.50), 30, false)
    }

    mod dish_store_tests {
        use super::*;

        #[tokio::test]
        async fn test_get_or_create_reuses_identical_tuple() {
            let (dishes, _) = repos();

            let (first, created) = dishes.get_or_create(meatballs()).await.unwrap();
            assert!(created);

            // Same tuple with a differently scaled price
            let again = DishFields::new("Meatballs", "", dec!(6.5), 30, false);
            let (second, created) = dishes.get_or_create(again).await.unwrap();
            assert!(!created);
            assert_eq!(first.id, second.id);
            assert_eq!(dishes.count().await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_get_or_create_distinguishes_price() {
            let (dishes, _) = repos();

            let (first, _) = dishes.get_or_create(meatballs()).await.unwrap();
            let pricier = DishFields::new("Meatballs", "", dec!(7.00), 30, false);
            let (second, created) = dishes.get_or_create(pricier).await.unwrap();

            assert!(created);
            assert_ne!(first.id, second.id);
            assert_eq!(dishes.count().await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_concurrent_get_or_create_yields_one_record() {
            let (dishes, _) = repos();

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let dishes = dishes.clone();
                    tokio::spawn(async move { dishes.get_or_create(meatballs()).await })
                })
                .collect();

            let mut ids = Vec::new();
            let mut created = 0;
            for handle in handles {
                let (dish, was_created) = handle.await.unwrap().unwrap();
                ids.push(dish.id);
                if was_created {
                    created += 1;
                }
            }

            ids.dedup();
            assert_eq!(ids.len(), 1);
            assert_eq!(created, 1);
            assert_eq!(dishes.count().await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_create_rejects_duplicate_natural_key() {
            let (dishes, _) = repos();

            dishes.create(Dish::new(meatballs())).await.unwrap();
            let result = dishes.create(Dish::new(meatballs())).await;

            assert!(matches!(
                result,
                Err(RepositoryError::UniqueConstraintViolation { .. })
            ));
        }

        #[tokio::test]
        async fn test_update_moves_natural_key() {
            let (dishes, _) = repos();

            let mut dish = dishes.create(Dish::new(meatballs())).await.unwrap();
            dish.price = dec!(8.00);
            let updated = dishes.update(dish).await.unwrap();

            assert!(dishes.find_by_fields(&meatballs()).await.unwrap().is_none());
            let found = dishes
                .find_by_fields(&updated.fields())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.id, updated.id);
            assert_eq!(found.modified_date, today());
        }

        #[tokio::test]
        async fn test_update_rejects_tuple_of_other_dish() {
            let (dishes, _) = repos();

            dishes.create(Dish::new(meatballs())).await.unwrap();
            let mut other = dishes
                .create(Dish::new(DishFields::new("Soup", "", dec!(4), 10, true)))
                .await
                .unwrap();

            let target = meatballs();
            other.title = target.title;
            other.price = target.price;
            other.time_minutes = target.time_minutes;
            other.vegetarian = target.vegetarian;

            assert!(matches!(
                dishes.update(other).await,
                Err(RepositoryError::UniqueConstraintViolation { .. })
            ));
        }

        #[tokio::test]
        async fn test_update_unknown_dish() {
            let (dishes, _) = repos();

            let result = dishes.update(Dish::new(meatballs())).await;
            assert!(matches!(result, Err(RepositoryError::NotFound)));
        }

        #[tokio::test]
        async fn test_delete_detaches_from_menus() {
            let (dishes, menus) = repos();

            let dish = dishes.create(Dish::new(meatballs())).await.unwrap();
            let menu = menus.create(Menu::new("Monday menu", "")).await.unwrap();
            menus
                .attach_dishes(&menu.id, &[dish.id.clone()])
                .await
                .unwrap();

            dishes.delete(&dish.id).await.unwrap();

            let menu = menus.find_by_id(&menu.id).await.unwrap().unwrap();
            assert_eq!(menu.dish_count(), 0);
            assert!(dishes.find_by_fields(&meatballs()).await.unwrap().is_none());
            assert!(matches!(
                dishes.delete(&dish.id).await,
                Err(RepositoryError::NotFound)
            ));
        }

        #[tokio::test]
        async fn test_find_changed_on() {
            let (dishes, _) = repos();
            let yesterday = today().pred_opt().unwrap();

            let mut old = Dish::new(meatballs());
            old.created_date = yesterday.pred_opt().unwrap();
            old.modified_date = yesterday;
            dishes.create(old.clone()).await.unwrap();
            dishes
                .create(Dish::new(DishFields::new("Soup", "", dec!(4), 10, true)))
                .await
                .unwrap();

            let changed = dishes.find_changed_on(yesterday).await.unwrap();
            assert_eq!(changed.len(), 1);
            assert_eq!(changed[0].id, old.id);
        }

        #[tokio::test]
        async fn test_find_by_ids_skips_unknown() {
            let (dishes, _) = repos();
            let dish = dishes.create(Dish::new(meatballs())).await.unwrap();

            let found = dishes
                .find_by_ids(&[dish.id.clone(), "Dmissing0".to_string()])
                .await
                .unwrap();
            assert_eq!(found.len(), 1);
        }
    }

    mod menu_store_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_rejects_duplicate_title() {
            let (_, menus) = repos();

            menus.create(Menu::new("Sweet menu", "")).await.unwrap();
            let result = menus.create(Menu::new("Sweet menu", "Other")).await;

            match result {
                Err(RepositoryError::UniqueConstraintViolation { field, .. }) => {
                    assert_eq!(field, "title")
                }
                other => panic!("Expected UniqueConstraintViolation, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_update_keeps_association_and_frees_old_title() {
            let (dishes, menus) = repos();
            let dish = dishes.create(Dish::new(meatballs())).await.unwrap();
            let mut menu = menus.create(Menu::new("Monday menu", "")).await.unwrap();
            menus
                .attach_dishes(&menu.id, &[dish.id.clone()])
                .await
                .unwrap();

            // The caller's copy has no dishes; the stored association must survive
            menu.title = "Tuesday menu".to_string();
            let updated = menus.update(menu).await.unwrap();

            assert_eq!(updated.dish_count(), 1);
            assert!(menus.find_by_title("Monday menu").await.unwrap().is_none());
            assert!(menus.find_by_title("Tuesday menu").await.unwrap().is_some());
            menus.create(Menu::new("Monday menu", "")).await.unwrap();
        }

        #[tokio::test]
        async fn test_update_rejects_title_of_other_menu() {
            let (_, menus) = repos();
            menus.create(Menu::new("Monday menu", "")).await.unwrap();
            let mut tuesday = menus.create(Menu::new("Tuesday menu", "")).await.unwrap();

            tuesday.title = "Monday menu".to_string();
            assert!(matches!(
                menus.update(tuesday).await,
                Err(RepositoryError::UniqueConstraintViolation { .. })
            ));
        }

        #[tokio::test]
        async fn test_attach_is_set_union_and_clear_empties() {
            let (dishes, menus) = repos();
            let a = dishes.create(Dish::new(meatballs())).await.unwrap();
            let b = dishes
                .create(Dish::new(DishFields::new("Soup", "", dec!(4), 10, true)))
                .await
                .unwrap();
            let menu = menus.create(Menu::new("Monday menu", "")).await.unwrap();

            menus
                .attach_dishes(&menu.id, &[a.id.clone(), a.id.clone()])
                .await
                .unwrap();
            let menu = menus
                .attach_dishes(&menu.id, &[a.id.clone(), b.id.clone()])
                .await
                .unwrap();
            assert_eq!(menu.dish_count(), 2);

            let menu = menus.clear_dishes(&menu.id).await.unwrap();
            assert_eq!(menu.dish_count(), 0);
            assert_eq!(dishes.count().await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_attach_unknown_menu_or_dish() {
            let (dishes, menus) = repos();
            let dish = dishes.create(Dish::new(meatballs())).await.unwrap();
            let menu = menus.create(Menu::new("Monday menu", "")).await.unwrap();

            assert!(matches!(
                menus.attach_dishes("Mmissing0", &[dish.id.clone()]).await,
                Err(RepositoryError::NotFound)
            ));
            assert!(matches!(
                menus
                    .attach_dishes(&menu.id, &["Dmissing0".to_string()])
                    .await,
                Err(RepositoryError::ConstraintViolation { .. })
            ));
            assert!(matches!(
                menus.clear_dishes("Mmissing0").await,
                Err(RepositoryError::NotFound)
            ));
        }

        #[tokio::test]
        async fn test_delete_keeps_dishes() {
            let (dishes, menus) = repos();
            let dish = dishes.create(Dish::new(meatballs())).await.unwrap();
            let menu = menus.create(Menu::new("Monday menu", "")).await.unwrap();
            menus
                .attach_dishes(&menu.id, &[dish.id.clone()])
                .await
                .unwrap();

            menus.delete(&menu.id).await.unwrap();

            assert!(menus.find_by_id(&menu.id).await.unwrap().is_none());
            assert!(dishes.find_by_id(&dish.id).await.unwrap().is_some());
            assert_eq!(menus.count().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_find_all_applies_filters() {
            let (_, menus) = repos();
            menus.create(Menu::new("Monday menu", "")).await.unwrap();
            menus.create(Menu::new("Tuesday menu", "")).await.unwrap();

            let filters = MenuFilters {
                title: Some("MONDAY".to_string()),
                ..Default::default()
            };
            let found = menus.find_all(filters).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].title, "Monday menu");

            let all = menus.find_all(MenuFilters::default()).await.unwrap();
            assert_eq!(all.len(), 2);
        }
    }
}

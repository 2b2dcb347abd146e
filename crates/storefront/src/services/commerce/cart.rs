//! Cart operations.

use tracing::instrument;

use bazaar_core::{ProductId, UserId};

use super::CommerceError;
use crate::db::{CartStore, RepositoryError};
use crate::models::cart::{Cart, CartLine, SavedItem};

/// Cart service for one request.
pub struct CartService<'a> {
    carts: &'a dyn CartStore,
}

impl<'a> CartService<'a> {
    #[must_use]
    pub const fn new(carts: &'a dyn CartStore) -> Self {
        Self { carts }
    }

    /// The user's cart.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::CartNotFound` if the user never added anything.
    pub async fn get_cart(&self, user_id: UserId) -> Result<Cart, CommerceError> {
        self.carts
            .get(user_id)
            .await?
            .ok_or(CommerceError::CartNotFound)
    }

    /// Add units of a product, creating the cart on first use. Adding a
    /// product that is already present increases its quantity.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::Validation` if `quantity` is not positive or
    /// the resulting quantity no longer fits, `CommerceError::UnknownProduct`
    /// if the product doesn't exist.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Cart, CommerceError> {
        if quantity <= 0 {
            return Err(CommerceError::Validation(
                "quantity must be positive".to_owned(),
            ));
        }

        self.carts
            .add_item(user_id, product_id, quantity)
            .await
            .map_err(cart_error)
    }

    /// Set absolute quantities; a quantity of 0 removes the product.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::Validation` for a negative quantity,
    /// `CommerceError::CartNotFound` if the user has no cart,
    /// `CommerceError::UnknownProduct` if a product doesn't exist.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn update_cart(
        &self,
        user_id: UserId,
        lines: &[CartLine],
    ) -> Result<Cart, CommerceError> {
        if lines.iter().any(|line| line.quantity < 0) {
            return Err(CommerceError::Validation(
                "quantity must not be negative".to_owned(),
            ));
        }

        self.carts
            .replace_items(user_id, lines)
            .await
            .map_err(cart_error)
    }

    /// Remove a product from the cart.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::CartNotFound` if the user has no cart.
    pub async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, CommerceError> {
        self.carts
            .remove_item(user_id, product_id)
            .await
            .map_err(cart_error)
    }

    /// Move a product out of the cart into the saved items.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::CartNotFound` if the user has no cart.
    pub async fn save_for_later(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, CommerceError> {
        self.carts
            .save_for_later(user_id, product_id)
            .await
            .map_err(cart_error)
    }

    /// Items previously saved for later.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::Repository` if the database operation fails.
    pub async fn saved_items(&self, user_id: UserId) -> Result<Vec<SavedItem>, CommerceError> {
        Ok(self.carts.saved_items(user_id).await?)
    }
}

fn cart_error(e: RepositoryError) -> CommerceError {
    match e {
        RepositoryError::NotFound => CommerceError::CartNotFound,
        RepositoryError::Conflict(_) => CommerceError::UnknownProduct,
        RepositoryError::OutOfRange(_) => {
            CommerceError::Validation("quantity is too large".to_owned())
        }
        other => CommerceError::Repository(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bazaar_core::Money;

    use super::*;
    use crate::db::memory::MemoryStore;

    const USER: UserId = UserId::new(1);
    const MUG: ProductId = ProductId::new(10);
    const TEA: ProductId = ProductId::new(11);

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.set_product_price(MUG, Money::from_cents(1200));
        store.set_product_price(TEA, Money::from_cents(450));
        store
    }

    #[tokio::test]
    async fn test_get_cart_before_first_add() {
        let store = store();
        let carts = CartService::new(&store);
        assert!(matches!(
            carts.get_cart(USER).await,
            Err(CommerceError::CartNotFound)
        ));
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let store = store();
        let carts = CartService::new(&store);

        carts.add_item(USER, MUG, 2).await.unwrap();
        let cart = carts.get_cart(USER).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.quantity_of(MUG), Some(2));
        assert_eq!(cart.total_amount, Money::from_cents(2400));
    }

    #[tokio::test]
    async fn test_second_add_increments_single_line() {
        let store = store();
        let carts = CartService::new(&store);

        carts.add_item(USER, MUG, 2).await.unwrap();
        let cart = carts.add_item(USER, MUG, 3).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.quantity_of(MUG), Some(5));
    }

    #[tokio::test]
    async fn test_add_rejects_non_positive_quantity() {
        let store = store();
        let carts = CartService::new(&store);

        for quantity in [0, -1] {
            assert!(matches!(
                carts.add_item(USER, MUG, quantity).await,
                Err(CommerceError::Validation(_))
            ));
        }
        assert_eq!(store.cart_count(USER), 0);
    }

    #[tokio::test]
    async fn test_add_past_quantity_limit_is_rejected() {
        let store = store();
        let carts = CartService::new(&store);

        carts.add_item(USER, MUG, i32::MAX).await.unwrap();
        assert!(matches!(
            carts.add_item(USER, MUG, 1).await,
            Err(CommerceError::Validation(msg)) if msg == "quantity is too large"
        ));
        assert_eq!(
            carts.get_cart(USER).await.unwrap().quantity_of(MUG),
            Some(i32::MAX)
        );
    }

    #[tokio::test]
    async fn test_add_unknown_product() {
        let store = store();
        let carts = CartService::new(&store);
        assert!(matches!(
            carts.add_item(USER, ProductId::new(404), 1).await,
            Err(CommerceError::UnknownProduct)
        ));
    }

    #[tokio::test]
    async fn test_update_with_zero_removes_product() {
        let store = store();
        let carts = CartService::new(&store);
        carts.add_item(USER, MUG, 1).await.unwrap();
        carts.add_item(USER, TEA, 1).await.unwrap();

        let lines = [
            CartLine {
                product_id: MUG,
                quantity: 0,
            },
            CartLine {
                product_id: TEA,
                quantity: 4,
            },
        ];
        carts.update_cart(USER, &lines).await.unwrap();

        let cart = carts.get_cart(USER).await.unwrap();
        assert_eq!(cart.quantity_of(MUG), None);
        assert_eq!(cart.quantity_of(TEA), Some(4));
        assert_eq!(cart.total_amount, Money::from_cents(1800));
    }

    #[tokio::test]
    async fn test_update_with_unknown_product_changes_nothing() {
        let store = store();
        let carts = CartService::new(&store);
        carts.add_item(USER, MUG, 1).await.unwrap();

        let lines = [
            CartLine {
                product_id: MUG,
                quantity: 7,
            },
            CartLine {
                product_id: ProductId::new(404),
                quantity: 1,
            },
        ];
        assert!(matches!(
            carts.update_cart(USER, &lines).await,
            Err(CommerceError::UnknownProduct)
        ));
        assert_eq!(carts.get_cart(USER).await.unwrap().quantity_of(MUG), Some(1));
    }

    #[tokio::test]
    async fn test_mutations_without_cart() {
        let store = store();
        let carts = CartService::new(&store);

        assert!(matches!(
            carts.remove_item(USER, MUG).await,
            Err(CommerceError::CartNotFound)
        ));
        assert!(matches!(
            carts.save_for_later(USER, MUG).await,
            Err(CommerceError::CartNotFound)
        ));
        assert!(matches!(
            carts.update_cart(USER, &[]).await,
            Err(CommerceError::CartNotFound)
        ));
    }

    #[tokio::test]
    async fn test_save_for_later_moves_item() {
        let store = store();
        let carts = CartService::new(&store);
        carts.add_item(USER, MUG, 2).await.unwrap();
        carts.add_item(USER, TEA, 1).await.unwrap();

        let cart = carts.save_for_later(USER, MUG).await.unwrap();
        assert_eq!(cart.quantity_of(MUG), None);
        assert_eq!(cart.total_amount, Money::from_cents(450));

        let saved = carts.saved_items(USER).await.unwrap();
        assert_eq!(saved.len(), 1);
        let item = saved.first().unwrap();
        assert_eq!(item.product_id, MUG);
        assert_eq!(item.quantity, 2);
    }

    #[tokio::test]
    async fn test_remove_absent_item_is_noop() {
        let store = store();
        let carts = CartService::new(&store);
        carts.add_item(USER, MUG, 2).await.unwrap();

        let cart = carts.remove_item(USER, TEA).await.unwrap();
        assert_eq!(cart.quantity_of(MUG), Some(2));
    }
}

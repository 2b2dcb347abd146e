//! In-process implementation of every store.
//!
//! Backs the test suites and local runs without a database. A single mutex
//! guards all tables, so each store call is atomic the same way a
//! `PostgreSQL` transaction is. Failures can be injected for checkout paths
//! that are otherwise unreachable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bazaar_core::{
    AddressId, CartId, ChallengeId, Email, Money, OrderId, OrderStatus, PaymentId, PaymentStatus,
    ProductId, UserId,
};

use super::{
    CartStore, ChallengeStore, CredentialStore, OrderStore, PaymentLedger, RepositoryError, Stores,
};
use crate::models::cart::{Cart, CartItem, CartLine, SavedItem};
use crate::models::challenge::Challenge;
use crate::models::order::{CancelOutcome, Order, OrderItem, Payment};
use crate::models::user::{Address, NewAddress, NewUser, ProfileUpdate, User};

struct UserRecord {
    user: User,
    password_hash: String,
}

struct CartRecord {
    id: CartId,
    user_id: UserId,
    /// `(product, quantity)` in insertion order.
    items: Vec<(ProductId, i32)>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    next_id: i32,
    users: Vec<UserRecord>,
    addresses: Vec<Address>,
    challenges: Vec<Challenge>,
    products: HashMap<ProductId, Money>,
    carts: Vec<CartRecord>,
    saved: Vec<(UserId, SavedItem)>,
    payments: Vec<Payment>,
    orders: Vec<Order>,
    failing_order_writes: usize,
    failing_payment_writes: usize,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn price_of(&self, product_id: ProductId) -> Result<Money, RepositoryError> {
        self.products
            .get(&product_id)
            .copied()
            .ok_or_else(|| RepositoryError::Conflict("unknown product".to_owned()))
    }

    fn email_taken(&self, email: &Email, except: Option<UserId>) -> bool {
        self.users
            .iter()
            .any(|r| &r.user.email == email && Some(r.user.id) != except)
    }

    fn cart_mut(&mut self, user_id: UserId) -> Result<&mut CartRecord, RepositoryError> {
        self.carts
            .iter_mut()
            .find(|c| c.user_id == user_id)
            .ok_or(RepositoryError::NotFound)
    }

    fn cart_view(&self, user_id: UserId) -> Result<Option<Cart>, RepositoryError> {
        let Some(record) = self.carts.iter().find(|c| c.user_id == user_id) else {
            return Ok(None);
        };

        let items = record
            .items
            .iter()
            .map(|&(product_id, quantity)| {
                Ok(CartItem {
                    product_id,
                    quantity,
                    unit_price: self.price_of(product_id)?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Some(Cart::new(
            record.id,
            record.user_id,
            items,
            record.updated_at,
        )))
    }

    fn require_cart_view(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        self.cart_view(user_id)?.ok_or(RepositoryError::NotFound)
    }
}

/// Every store backed by shared in-memory tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wire this store into every slot of [`Stores`].
    #[must_use]
    pub fn stores(&self) -> Stores {
        Stores {
            users: Arc::new(self.clone()),
            challenges: Arc::new(self.clone()),
            carts: Arc::new(self.clone()),
            payments: Arc::new(self.clone()),
            orders: Arc::new(self.clone()),
        }
    }

    /// Register (or reprice) a product.
    pub fn set_product_price(&self, product_id: ProductId, price: Money) {
        self.lock().products.insert(product_id, price);
    }

    /// Make the next `n` order writes fail with a database error.
    pub fn fail_next_order_writes(&self, n: usize) {
        self.lock().failing_order_writes = n;
    }

    /// Make the next `n` payment writes fail with a database error.
    pub fn fail_next_payment_writes(&self, n: usize) {
        self.lock().failing_payment_writes = n;
    }

    /// Snapshot of the payment ledger.
    #[must_use]
    pub fn payments(&self) -> Vec<Payment> {
        self.lock().payments.clone()
    }

    /// Snapshot of all orders, every user.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    /// Number of cart rows held for `user_id`.
    #[must_use]
    pub fn cart_count(&self, user_id: UserId) -> usize {
        self.lock()
            .carts
            .iter()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    /// Number of stored challenges for `user_id`.
    #[must_use]
    pub fn challenge_count(&self, user_id: UserId) -> usize {
        self.lock()
            .challenges
            .iter()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    /// Stored password hash, if the user exists.
    #[must_use]
    pub fn password_hash(&self, user_id: UserId) -> Option<String> {
        self.lock()
            .users
            .iter()
            .find(|r| r.user.id == user_id)
            .map(|r| r.password_hash.clone())
    }

    /// Force an order into `status`, standing in for fulfillment.
    pub fn set_order_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some(order) = self.lock().orders.iter_mut().find(|o| o.id == order_id) {
            order.status = status;
        }
    }
}

/// Sum two stored quantities the way an `INTEGER` column would accept them.
fn add_quantity(current: i32, added: i32) -> Result<i32, RepositoryError> {
    current
        .checked_add(added)
        .ok_or_else(|| RepositoryError::OutOfRange("integer out of range".to_owned()))
}

fn injected_failure() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create(&self, user: &NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.lock();
        if tables.email_taken(&user.email, None) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }

        let now = Utc::now();
        let created = User {
            id: UserId::new(tables.next_id()),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            permissions: user.permissions.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.users.push(UserRecord {
            user: created.clone(),
            password_hash: user.password_hash.clone(),
        });

        Ok(created)
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|r| r.user.id == id)
            .map(|r| r.user.clone()))
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|r| &r.user.email == email)
            .map(|r| r.user.clone()))
    }

    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|r| &r.user.email == email)
            .map(|r| (r.user.clone(), r.password_hash.clone())))
    }

    async fn get_password_hash_by_id(
        &self,
        id: UserId,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|r| r.user.id == id)
            .map(|r| (r.user.clone(), r.password_hash.clone())))
    }

    async fn update_password(
        &self,
        id: UserId,
        password_hash: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        let record = tables
            .users
            .iter_mut()
            .find(|r| r.user.id == id)
            .ok_or(RepositoryError::NotFound)?;
        password_hash.clone_into(&mut record.password_hash);
        record.user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError> {
        let mut tables = self.lock();
        if tables.email_taken(&update.email, Some(id)) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }

        let record = tables
            .users
            .iter_mut()
            .find(|r| r.user.id == id)
            .ok_or(RepositoryError::NotFound)?;
        record.user.first_name.clone_from(&update.first_name);
        record.user.last_name.clone_from(&update.last_name);
        record.user.email = update.email.clone();
        record.user.updated_at = Utc::now();

        Ok(record.user.clone())
    }

    async fn add_address(
        &self,
        user_id: UserId,
        address: &NewAddress,
    ) -> Result<Address, RepositoryError> {
        let mut tables = self.lock();
        if !tables.users.iter().any(|r| r.user.id == user_id) {
            return Err(RepositoryError::Conflict("unknown user".to_owned()));
        }

        let created = Address {
            id: AddressId::new(tables.next_id()),
            user_id,
            street: address.street.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            country: address.country.clone(),
            zipcode: address.zipcode.clone(),
            created_at: Utc::now(),
        };
        tables.addresses.push(created.clone());

        Ok(created)
    }

    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError> {
        Ok(self
            .lock()
            .addresses
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn create(
        &self,
        user_id: UserId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Challenge, RepositoryError> {
        let mut tables = self.lock();
        let challenge = Challenge {
            id: ChallengeId::new(tables.next_id()),
            user_id,
            code: code.to_owned(),
            expires_at,
            created_at: Utc::now(),
        };
        tables.challenges.push(challenge.clone());
        Ok(challenge)
    }

    async fn latest(&self, user_id: UserId) -> Result<Option<Challenge>, RepositoryError> {
        Ok(self
            .lock()
            .challenges
            .iter()
            .filter(|c| c.user_id == user_id)
            .max_by_key(|c| c.id.as_i32())
            .cloned())
    }

    async fn consume(&self, challenge: &Challenge) -> Result<bool, RepositoryError> {
        let mut tables = self.lock();
        let existed = tables.challenges.iter().any(|c| c.id == challenge.id);
        tables.challenges.retain(|c| {
            !(c.user_id == challenge.user_id && c.id.as_i32() <= challenge.id.as_i32())
        });
        Ok(existed)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn get(&self, user_id: UserId) -> Result<Option<Cart>, RepositoryError> {
        self.lock().cart_view(user_id)
    }

    async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Cart, RepositoryError> {
        let mut tables = self.lock();
        tables.price_of(product_id)?;

        if !tables.carts.iter().any(|c| c.user_id == user_id) {
            let id = CartId::new(tables.next_id());
            tables.carts.push(CartRecord {
                id,
                user_id,
                items: Vec::new(),
                updated_at: Utc::now(),
            });
        }

        let cart = tables.cart_mut(user_id)?;
        match cart.items.iter_mut().find(|(p, _)| *p == product_id) {
            Some((_, existing)) => *existing = add_quantity(*existing, quantity)?,
            None => cart.items.push((product_id, quantity)),
        }
        cart.updated_at = Utc::now();

        tables.require_cart_view(user_id)
    }

    async fn replace_items(
        &self,
        user_id: UserId,
        lines: &[CartLine],
    ) -> Result<Cart, RepositoryError> {
        let mut tables = self.lock();
        tables.cart_mut(user_id)?;
        for line in lines.iter().filter(|l| l.quantity > 0) {
            tables.price_of(line.product_id)?;
        }

        let cart = tables.cart_mut(user_id)?;
        for line in lines {
            let position = cart.items.iter().position(|(p, _)| *p == line.product_id);
            match (position, line.quantity) {
                (Some(i), 0) => {
                    cart.items.remove(i);
                }
                (Some(i), q) => {
                    if let Some(item) = cart.items.get_mut(i) {
                        item.1 = q;
                    }
                }
                (None, 0) => {}
                (None, q) => cart.items.push((line.product_id, q)),
            }
        }
        cart.updated_at = Utc::now();

        tables.require_cart_view(user_id)
    }

    async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, RepositoryError> {
        let mut tables = self.lock();
        let cart = tables.cart_mut(user_id)?;
        cart.items.retain(|(p, _)| *p != product_id);
        cart.updated_at = Utc::now();

        tables.require_cart_view(user_id)
    }

    async fn save_for_later(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, RepositoryError> {
        let mut tables = self.lock();
        let moved = tables
            .cart_mut(user_id)?
            .items
            .iter()
            .find(|(p, _)| *p == product_id)
            .map(|&(_, quantity)| quantity);

        if let Some(quantity) = moved {
            let now = Utc::now();
            match tables
                .saved
                .iter_mut()
                .find(|(u, s)| *u == user_id && s.product_id == product_id)
            {
                Some((_, saved)) => {
                    saved.quantity = add_quantity(saved.quantity, quantity)?;
                    saved.saved_at = now;
                }
                None => tables.saved.push((
                    user_id,
                    SavedItem {
                        product_id,
                        quantity,
                        saved_at: now,
                    },
                )),
            }

            let cart = tables.cart_mut(user_id)?;
            cart.items.retain(|(p, _)| *p != product_id);
            cart.updated_at = now;
        }

        tables.require_cart_view(user_id)
    }

    async fn saved_items(&self, user_id: UserId) -> Result<Vec<SavedItem>, RepositoryError> {
        Ok(self
            .lock()
            .saved
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn remove_ordered(
        &self,
        user_id: UserId,
        ordered: &[CartLine],
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        let cart = tables.cart_mut(user_id)?;
        for line in ordered {
            if let Some(item) = cart.items.iter_mut().find(|(p, _)| *p == line.product_id) {
                item.1 -= line.quantity.min(item.1);
            }
        }
        cart.items.retain(|&(_, quantity)| quantity > 0);
        cart.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for MemoryStore {
    async fn process_payment(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<Payment, RepositoryError> {
        let mut tables = self.lock();
        if tables.failing_payment_writes > 0 {
            tables.failing_payment_writes -= 1;
            return Err(injected_failure());
        }

        let payment = Payment {
            id: PaymentId::new(tables.next_id()),
            user_id,
            amount,
            status: PaymentStatus::Successful,
            needs_reconciliation: false,
            created_at: Utc::now(),
        };
        tables.payments.push(payment.clone());
        Ok(payment)
    }

    async fn flag_for_reconciliation(
        &self,
        payment_id: PaymentId,
        _note: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        let payment = tables
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or(RepositoryError::NotFound)?;
        payment.needs_reconciliation = true;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
        items: &[OrderItem],
    ) -> Result<Order, RepositoryError> {
        let mut tables = self.lock();
        if tables.failing_order_writes > 0 {
            tables.failing_order_writes -= 1;
            return Err(injected_failure());
        }
        if tables.orders.iter().any(|o| o.payment_id == payment_id) {
            return Err(RepositoryError::Conflict(
                "payment already funds an order".to_owned(),
            ));
        }

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(tables.next_id()),
            user_id,
            payment_id,
            status: OrderStatus::PaymentComplete,
            total_amount: items.iter().map(|i| i.unit_price.times(i.quantity)).sum(),
            items: items.to_vec(),
            created_at: now,
            updated_at: now,
        };
        tables.orders.push(order.clone());
        Ok(order)
    }

    async fn find_by_payment(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.payment_id == payment_id && o.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.id.as_i32()));
        Ok(orders)
    }

    async fn get_for_user(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.id == order_id && o.user_id == user_id)
            .cloned())
    }

    async fn cancel(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<CancelOutcome, RepositoryError> {
        let mut tables = self.lock();
        let Some(order) = tables
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.user_id == user_id)
        else {
            return Ok(CancelOutcome::NotFound);
        };

        if order.status.is_terminal() {
            return Ok(CancelOutcome::Rejected(order.status));
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(CancelOutcome::Cancelled(order.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use bazaar_core::Permission;

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
            email: Email::parse(email).unwrap(),
            password_hash: "hash".to_owned(),
            permissions: BTreeSet::from([Permission::DEFAULT]),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        CredentialStore::create(&store, &new_user("a@example.com"))
            .await
            .unwrap();

        let err = CredentialStore::create(&store, &new_user("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_consume_removes_older_challenges() {
        let store = MemoryStore::new();
        let user = UserId::new(7);
        let expires = Utc::now();
        ChallengeStore::create(&store, user, "111111", expires)
            .await
            .unwrap();
        let newest = ChallengeStore::create(&store, user, "222222", expires)
            .await
            .unwrap();

        assert!(store.consume(&newest).await.unwrap());
        assert_eq!(store.challenge_count(user), 0);
        assert!(!store.consume(&newest).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_item_accumulates_quantity() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let product = ProductId::new(10);
        store.set_product_price(product, Money::from_cents(250));

        store.add_item(user, product, 2).await.unwrap();
        let cart = store.add_item(user, product, 3).await.unwrap();

        assert_eq!(cart.quantity_of(product), Some(5));
        assert_eq!(cart.total_amount, Money::from_cents(1250));
        assert_eq!(store.cart_count(user), 1);
    }

    #[tokio::test]
    async fn test_add_item_overflow_is_out_of_range() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let product = ProductId::new(10);
        store.set_product_price(product, Money::from_cents(1));

        store.add_item(user, product, i32::MAX).await.unwrap();
        let err = store.add_item(user, product, 1).await.unwrap_err();

        assert!(matches!(err, RepositoryError::OutOfRange(_)));
        let cart = store.get(user).await.unwrap().unwrap();
        assert_eq!(cart.quantity_of(product), Some(i32::MAX));
    }

    #[tokio::test]
    async fn test_save_for_later_overflow_keeps_cart_line() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let product = ProductId::new(10);
        store.set_product_price(product, Money::from_cents(1));

        store.add_item(user, product, i32::MAX).await.unwrap();
        store.save_for_later(user, product).await.unwrap();
        store.add_item(user, product, 1).await.unwrap();

        let err = store.save_for_later(user, product).await.unwrap_err();
        assert!(matches!(err, RepositoryError::OutOfRange(_)));
        let cart = store.get(user).await.unwrap().unwrap();
        assert_eq!(cart.quantity_of(product), Some(1));
    }

    #[tokio::test]
    async fn test_remove_ordered_subtracts_quantities() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let mug = ProductId::new(10);
        let tea = ProductId::new(11);
        let jam = ProductId::new(12);
        for product in [mug, tea, jam] {
            store.set_product_price(product, Money::from_cents(100));
        }
        store.add_item(user, mug, 2).await.unwrap();
        store.add_item(user, tea, 5).await.unwrap();
        store.add_item(user, jam, 1).await.unwrap();

        let ordered = [
            CartLine {
                product_id: mug,
                quantity: 2,
            },
            CartLine {
                product_id: tea,
                quantity: 3,
            },
        ];
        store.remove_ordered(user, &ordered).await.unwrap();

        let cart = store.get(user).await.unwrap().unwrap();
        assert_eq!(cart.quantity_of(mug), None);
        assert_eq!(cart.quantity_of(tea), Some(2));
        assert_eq!(cart.quantity_of(jam), Some(1));
    }

    #[tokio::test]
    async fn test_add_unknown_product_conflicts() {
        let store = MemoryStore::new();
        let err = store
            .add_item(UserId::new(1), ProductId::new(99), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cancel_terminal_order_is_rejected() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let order = store
            .create_order(user, PaymentId::new(1), &[])
            .await
            .unwrap();
        store.set_order_status(order.id, OrderStatus::Complete);

        let outcome = store.cancel(user, order.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Rejected(OrderStatus::Complete));

        let other = store.cancel(UserId::new(2), order.id).await.unwrap();
        assert_eq!(other, CancelOutcome::NotFound);
    }
}

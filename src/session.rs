//! Session state: who is logged in, with which token, and locale preferences.
//!
//! A `Session` is created once at startup by `Session::initialize`, which
//! rehydrates from durable storage. It moves between two states, anonymous and
//! authenticated, only through `login` and `logout`. Language and currency are
//! independent of that state and survive logout.

use crate::cart::{self, CartApi};
use crate::storage::{Storage, KEY_CURRENCY, KEY_LANGUAGE, KEY_TOKEN, KEY_USER};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Principal category governing authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    GeneralManager,
    BranchManager,
    Chef,
    Cashier,
    Customer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::GeneralManager,
        Role::BranchManager,
        Role::Chef,
        Role::Cashier,
        Role::Customer,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "ADMIN" => Some(Self::Admin),
            "GENERAL_MANAGER" => Some(Self::GeneralManager),
            "BRANCH_MANAGER" => Some(Self::BranchManager),
            "CHEF" => Some(Self::Chef),
            "CASHIER" => Some(Self::Cashier),
            "CUSTOMER" => Some(Self::Customer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::GeneralManager => "GENERAL_MANAGER",
            Self::BranchManager => "BRANCH_MANAGER",
            Self::Chef => "CHEF",
            Self::Cashier => "CASHIER",
            Self::Customer => "CUSTOMER",
        }
    }

    /// Roles whose staff belong to a single branch
    pub fn is_branch_scoped(&self) -> bool {
        matches!(self, Self::BranchManager | Self::Chef | Self::Cashier)
    }

    /// Roles authorized for every branch
    pub fn is_chain_wide(&self) -> bool {
        matches!(self, Self::Admin | Self::GeneralManager)
    }

    /// Landing view after login
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Self::Admin => "/admin",
            Self::GeneralManager => "/general-manager",
            Self::BranchManager => "/branch-manager",
            Self::Chef => "/chef",
            Self::Cashier => "/cashier",
            Self::Customer => "/customer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated principal as issued by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<i64>,
}

/// User and token are only ever held together
#[derive(Debug, Clone)]
struct Credentials {
    user: User,
    token: String,
}

/// What happened to the cart during login
#[derive(Debug, Clone, PartialEq)]
pub enum CartSync {
    /// Not a customer account
    Skipped,
    /// Local cart replaced with the server's copy
    Replaced { items: usize, push_failed: bool },
    /// The server cart could not be fetched; local cart left as it was
    Abandoned(String),
}

pub struct Session {
    storage: Box<dyn Storage>,
    credentials: Option<Credentials>,
    language: String,
    currency: String,
}

impl Session {
    /// Rehydrate from durable storage. Never fails: anything missing or
    /// malformed falls back to an anonymous session with default preferences.
    pub fn initialize(storage: Box<dyn Storage>) -> Self {
        let token = storage.get(KEY_TOKEN);
        let user = storage
            .get(KEY_USER)
            .and_then(|raw| serde_json::from_str::<User>(&raw).ok());

        let credentials = match (token, user) {
            (Some(token), Some(user)) => Some(Credentials { user, token }),
            _ => None,
        };

        let language = storage
            .get(KEY_LANGUAGE)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let currency = storage
            .get(KEY_CURRENCY)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Self {
            storage,
            credentials,
            language,
            currency,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.credentials.as_ref().map(|c| &c.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.token.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Commit a new session, then for customers run the best-effort cart sync.
    /// The session stays committed whatever the cart sync outcome.
    pub fn login(&mut self, token: String, user: User, cart_api: &dyn CartApi) -> CartSync {
        let is_customer = user.role == Role::Customer;

        if let Err(e) = self.persist_credentials(&token, &user) {
            eprintln!("Warning: failed to persist session: {:#}", e);
        }
        self.credentials = Some(Credentials {
            user,
            token: token.clone(),
        });

        if !is_customer {
            return CartSync::Skipped;
        }

        // Cart sync errors are intentionally not propagated
        match self.sync_cart(cart_api, &token) {
            Ok((items, push_failed)) => CartSync::Replaced { items, push_failed },
            Err(e) => CartSync::Abandoned(format!("{:#}", e)),
        }
    }

    /// Push the local cart (if any) for merge, then replace it with the
    /// server's copy. The pull runs even when the push fails.
    /// Returns the number of items now cached and whether the push failed.
    fn sync_cart(&self, cart_api: &dyn CartApi, token: &str) -> Result<(usize, bool)> {
        let local = cart::load_local(self.storage());
        let push_failed = !local.is_empty() && cart_api.push(token, &local).is_err();

        let body = cart_api.pull(token)?;
        let items = cart::parse_cart_body(&body)?;
        cart::store_local(self.storage(), &items)?;
        Ok((items.len(), push_failed))
    }

    /// Clears the previous pair before writing the new one, so a write that
    /// fails part way leaves at most half a pair, which `initialize` rejects.
    fn persist_credentials(&self, token: &str, user: &User) -> Result<()> {
        let raw_user = serde_json::to_string(user)?;
        self.storage.remove(KEY_TOKEN)?;
        self.storage.remove(KEY_USER)?;
        self.storage.set(KEY_USER, &raw_user)?;
        self.storage.set(KEY_TOKEN, token)?;
        Ok(())
    }

    /// Drop the current credentials. Preferences and the cached cart are kept.
    pub fn logout(&mut self) {
        self.credentials = None;
        for key in [KEY_TOKEN, KEY_USER] {
            if let Err(e) = self.storage.remove(key) {
                eprintln!("Warning: failed to clear {}: {:#}", key, e);
            }
        }
    }

    pub fn set_language(&mut self, lang: &str) {
        self.language = lang.to_string();
        if let Err(e) = self.storage.set(KEY_LANGUAGE, lang) {
            eprintln!("Warning: failed to persist language: {:#}", e);
        }
    }

    pub fn set_currency(&mut self, curr: &str) {
        self.currency = curr.to_string();
        if let Err(e) = self.storage.set(KEY_CURRENCY, curr) {
            eprintln!("Warning: failed to persist currency: {:#}", e);
        }
    }

    /// True when a user is logged in and holds one of `required`.
    /// An empty `required` never matches.
    pub fn has_permission(&self, required: &[Role]) -> bool {
        self.user().is_some_and(|u| required.contains(&u.role))
    }

    /// True when a user is logged in and may act on `branch_id`
    pub fn has_branch_access(&self, branch_id: i64) -> bool {
        match self.user() {
            None => false,
            Some(u) if u.role.is_chain_wide() => true,
            Some(u) => u.branch_id == Some(branch_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartItem;
    use crate::storage::KEY_CART_ITEMS;
    use crate::storage::MemoryStorage;
    use anyhow::anyhow;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Storage handle shared between the session under test and the assertions
    #[derive(Clone, Default)]
    struct SharedStorage(Arc<MemoryStorage>);

    impl Storage for SharedStorage {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key)
        }
    }

    struct FakeCart {
        push_ok: bool,
        pull: Result<Value, String>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeCart {
        fn new(push_ok: bool, pull: Result<Value, String>) -> Self {
            Self {
                push_ok,
                pull,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CartApi for FakeCart {
        fn push(&self, token: &str, items: &[CartItem]) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("push {} {}", token, items.len()));
            if self.push_ok {
                Ok(())
            } else {
                Err(anyhow!("500 Internal Server Error"))
            }
        }

        fn pull(&self, token: &str) -> Result<Value> {
            self.calls.borrow_mut().push(format!("pull {}", token));
            self.pull.clone().map_err(|e| anyhow!(e))
        }
    }

    fn user(id: i64, role: Role, branch_id: Option<i64>) -> User {
        User {
            id,
            username: format!("user{}", id),
            role,
            branch_id,
        }
    }

    fn anonymous() -> Session {
        Session::initialize(Box::new(MemoryStorage::new()))
    }

    fn logged_in(u: User) -> Session {
        let mut session = anonymous();
        let cart = FakeCart::new(true, Ok(json!({"items": []})));
        session.login("tok".to_string(), u, &cart);
        session
    }

    fn assert_paired(session: &Session) {
        assert_eq!(session.token().is_some(), session.user().is_some());
    }

    #[test]
    fn test_role_parse_and_display() {
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
            assert_eq!(role.to_string(), role.as_str());
        }
        assert_eq!(Role::from_str("branch-manager"), Some(Role::BranchManager));
        assert_eq!(Role::from_str("chef"), Some(Role::Chef));
        assert_eq!(Role::from_str("waiter"), None);
    }

    #[test]
    fn test_role_serde_rejects_unknown() {
        let ok: User =
            serde_json::from_str(r#"{"id":1,"username":"a","role":"GENERAL_MANAGER"}"#).unwrap();
        assert_eq!(ok.role, Role::GeneralManager);
        assert_eq!(ok.branch_id, None);

        let bad = serde_json::from_str::<User>(r#"{"id":1,"username":"a","role":"SUPERUSER"}"#);
        assert!(bad.is_err());
        let lower = serde_json::from_str::<User>(r#"{"id":1,"username":"a","role":"admin"}"#);
        assert!(lower.is_err());
    }

    #[test]
    fn test_user_serialization_shape() {
        let u = user(3, Role::Chef, Some(5));
        let v = serde_json::to_value(&u).unwrap();
        assert_eq!(
            v,
            json!({"id": 3, "username": "user3", "role": "CHEF", "branchId": 5})
        );

        let v = serde_json::to_value(user(1, Role::Admin, None)).unwrap();
        assert!(v.get("branchId").is_none());

        let parsed: User =
            serde_json::from_str(r#"{"id":1,"username":"a","role":"ADMIN","branchId":null}"#)
                .unwrap();
        assert_eq!(parsed.branch_id, None);
    }

    #[test]
    fn test_initialize_defaults() {
        let session = anonymous();
        assert!(!session.is_authenticated());
        assert_paired(&session);
        assert_eq!(session.language(), "en");
        assert_eq!(session.currency(), "USD");
    }

    #[test]
    fn test_initialize_rehydrates_everything() {
        let raw_user = serde_json::to_string(&user(9, Role::Cashier, Some(2))).unwrap();
        let storage = MemoryStorage::with_entries([
            (KEY_TOKEN, "abc"),
            (KEY_USER, raw_user.as_str()),
            (KEY_LANGUAGE, "vi"),
            (KEY_CURRENCY, "VND"),
        ]);
        let session = Session::initialize(Box::new(storage));
        assert_eq!(session.token(), Some("abc"));
        assert_eq!(session.user().unwrap().id, 9);
        assert_eq!(session.language(), "vi");
        assert_eq!(session.currency(), "VND");
    }

    #[test]
    fn test_initialize_malformed_user_drops_token() {
        let storage =
            MemoryStorage::with_entries([(KEY_TOKEN, "abc"), (KEY_USER, "{not valid json")]);
        let session = Session::initialize(Box::new(storage));
        assert!(session.user().is_none());
        assert!(session.token().is_none());
    }

    #[test]
    fn test_initialize_partial_pairs_are_anonymous() {
        let raw_user = serde_json::to_string(&user(1, Role::Admin, None)).unwrap();
        let only_user = MemoryStorage::with_entries([(KEY_USER, raw_user.as_str())]);
        let session = Session::initialize(Box::new(only_user));
        assert!(!session.is_authenticated());
        assert_paired(&session);

        let only_token = MemoryStorage::with_entries([(KEY_TOKEN, "abc"), (KEY_LANGUAGE, "de")]);
        let session = Session::initialize(Box::new(only_token));
        assert!(!session.is_authenticated());
        assert_paired(&session);
        // Preferences load independently
        assert_eq!(session.language(), "de");
        assert_eq!(session.currency(), "USD");
    }

    #[test]
    fn test_initialize_unknown_role_is_anonymous() {
        let storage = MemoryStorage::with_entries([
            (KEY_TOKEN, "abc"),
            (KEY_USER, r#"{"id":1,"username":"a","role":"OWNER"}"#),
        ]);
        let session = Session::initialize(Box::new(storage));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_login_persists_and_rehydrates() {
        let storage = SharedStorage::default();
        let mut session = Session::initialize(Box::new(storage.clone()));
        let cart = FakeCart::new(true, Ok(json!({"items": []})));

        let outcome = session.login("abc".to_string(), user(4, Role::BranchManager, Some(5)), &cart);
        assert_eq!(outcome, CartSync::Skipped);
        assert!(cart.calls.borrow().is_empty());
        assert_paired(&session);

        let again = Session::initialize(Box::new(storage));
        assert_eq!(again.token(), Some("abc"));
        assert_eq!(again.user(), session.user());
    }

    #[test]
    fn test_customer_login_push_fails_pull_overwrites() {
        let storage = SharedStorage::default();
        cart::store_local(&storage, &[CartItem::new(11, 3, "Spring rolls", 4.5)]).unwrap();
        let mut session = Session::initialize(Box::new(storage.clone()));

        let server = json!({"items": [{"menuItemId": 2, "quantity": 1, "name": "Pho", "price": 9.0}]});
        let cart_api = FakeCart::new(false, Ok(server));
        let outcome = session.login("abc".to_string(), user(1, Role::Customer, None), &cart_api);

        assert_eq!(
            outcome,
            CartSync::Replaced {
                items: 1,
                push_failed: true
            }
        );
        assert_eq!(session.token(), Some("abc"));
        assert_eq!(session.user().unwrap().role, Role::Customer);
        assert_eq!(
            cart::load_local(&storage),
            vec![CartItem::new(2, 1, "Pho", 9.0)]
        );
        // Push is attempted before pull, both with the new token
        assert_eq!(*cart_api.calls.borrow(), vec!["push abc 1", "pull abc"]);
    }

    #[test]
    fn test_customer_login_empty_local_cart_skips_push() {
        let storage = SharedStorage::default();
        let mut session = Session::initialize(Box::new(storage.clone()));
        let cart_api = FakeCart::new(true, Ok(json!({"items": [{"menuItemId": 8, "quantity": 2}]})));

        let outcome = session.login("t".to_string(), user(1, Role::Customer, None), &cart_api);
        assert_eq!(
            outcome,
            CartSync::Replaced {
                items: 1,
                push_failed: false
            }
        );
        assert_eq!(*cart_api.calls.borrow(), vec!["pull t"]);
        assert_eq!(cart::load_local(&storage)[0].menu_item_id, 8);
    }

    #[test]
    fn test_customer_login_pull_failure_keeps_local_cart() {
        let storage = SharedStorage::default();
        let local = vec![CartItem::new(11, 3, "Spring rolls", 4.5)];
        cart::store_local(&storage, &local).unwrap();
        let mut session = Session::initialize(Box::new(storage.clone()));

        let cart_api = FakeCart::new(true, Err("connection refused".to_string()));
        let outcome = session.login("abc".to_string(), user(1, Role::Customer, None), &cart_api);

        assert!(matches!(outcome, CartSync::Abandoned(ref msg) if msg.contains("refused")));
        assert!(session.is_authenticated());
        assert_eq!(cart::load_local(&storage), local);
    }

    #[test]
    fn test_customer_login_malformed_body_keeps_local_cart() {
        let storage = SharedStorage::default();
        let local = vec![CartItem::new(1, 1, "Tea", 2.0)];
        cart::store_local(&storage, &local).unwrap();
        let mut session = Session::initialize(Box::new(storage.clone()));

        let cart_api = FakeCart::new(true, Ok(json!({"items": "nope"})));
        let outcome = session.login("abc".to_string(), user(1, Role::Customer, None), &cart_api);

        assert!(matches!(outcome, CartSync::Abandoned(_)));
        assert!(session.is_authenticated());
        assert_eq!(cart::load_local(&storage), local);
    }

    #[test]
    fn test_logout_keeps_preferences_and_cart() {
        let storage = SharedStorage::default();
        let mut session = Session::initialize(Box::new(storage.clone()));
        session.set_language("fr");
        session.set_currency("EUR");
        let cart_api = FakeCart::new(
            true,
            Ok(json!({"items": [{"menuItemId": 5, "quantity": 1}]})),
        );
        session.login("abc".to_string(), user(1, Role::Customer, None), &cart_api);
        let cart_before = storage.get(KEY_CART_ITEMS);

        session.logout();

        assert!(!session.is_authenticated());
        assert_paired(&session);
        assert_eq!(session.language(), "fr");
        assert_eq!(session.currency(), "EUR");
        assert!(storage.get(KEY_TOKEN).is_none());
        assert!(storage.get(KEY_USER).is_none());
        assert_eq!(storage.get(KEY_LANGUAGE).as_deref(), Some("fr"));
        assert_eq!(storage.get(KEY_CURRENCY).as_deref(), Some("EUR"));
        assert_eq!(storage.get(KEY_CART_ITEMS), cart_before);

        // Logging out twice is harmless
        session.logout();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_preferences_accept_any_string() {
        let storage = SharedStorage::default();
        let mut session = Session::initialize(Box::new(storage.clone()));
        session.set_language("xx-NOT-A-LOCALE");
        session.set_currency("");
        assert_eq!(session.language(), "xx-NOT-A-LOCALE");
        assert_eq!(session.currency(), "");
        assert_eq!(storage.get(KEY_CURRENCY).as_deref(), Some(""));
    }

    #[test]
    fn test_has_permission() {
        let session = logged_in(user(1, Role::Cashier, Some(3)));
        assert!(session.has_permission(&[Role::Cashier]));
        assert!(session.has_permission(&[Role::Admin, Role::Cashier]));
        assert!(!session.has_permission(&[Role::Admin]));
        assert!(session.has_permission(&Role::ALL));
        // Must ask for something specific
        assert!(!session.has_permission(&[]));
    }

    #[test]
    fn test_anonymous_denied_everything() {
        let session = anonymous();
        for role in Role::ALL {
            assert!(!session.has_permission(&[role]));
        }
        assert!(!session.has_permission(&Role::ALL));
        for branch in [-1, 0, 1, 5, i64::MAX] {
            assert!(!session.has_branch_access(branch));
        }
    }

    #[test]
    fn test_chain_wide_roles_access_every_branch() {
        for role in [Role::Admin, Role::GeneralManager] {
            for branch_id in [None, Some(1)] {
                let session = logged_in(user(1, role, branch_id));
                for branch in [0, 1, 2, 99, -7] {
                    assert!(session.has_branch_access(branch));
                }
            }
        }
    }

    #[test]
    fn test_branch_scoped_access() {
        let session = logged_in(user(2, Role::BranchManager, Some(5)));
        assert!(session.has_branch_access(5));
        assert!(!session.has_branch_access(7));
        // Same answer on repeated calls
        assert_eq!(session.has_branch_access(5), session.has_branch_access(5));

        let unassigned = logged_in(user(3, Role::Chef, None));
        assert!(!unassigned.has_branch_access(0));
        assert!(!unassigned.has_branch_access(5));

        let customer = logged_in(user(4, Role::Customer, None));
        assert!(!customer.has_branch_access(5));
    }

    #[test]
    fn test_relogin_replaces_credentials() {
        let mut session = logged_in(user(1, Role::Chef, Some(1)));
        let cart = FakeCart::new(true, Ok(json!({"items": []})));
        session.login("second".to_string(), user(2, Role::Admin, None), &cart);
        assert_eq!(session.token(), Some("second"));
        assert_eq!(session.user().unwrap().id, 2);
    }

    /// Shared storage whose writes to one key always fail
    struct FailingKey {
        inner: SharedStorage,
        key: &'static str,
    }

    impl Storage for FailingKey {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == self.key {
                return Err(anyhow!("disk full"));
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_relogin_failed_user_write_never_mixes_principals() {
        let storage = SharedStorage::default();
        let cart = FakeCart::new(true, Ok(json!({"items": []})));

        let mut session = Session::initialize(Box::new(storage.clone()));
        session.login("tok-admin".to_string(), user(1, Role::Admin, None), &cart);
        drop(session);

        let failing = FailingKey {
            inner: storage.clone(),
            key: KEY_USER,
        };
        let mut session = Session::initialize(Box::new(failing));
        assert_eq!(session.token(), Some("tok-admin"));
        session.login("tok-chef".to_string(), user(2, Role::Chef, Some(5)), &cart);
        // The running process still holds the new login
        assert_eq!(session.token(), Some("tok-chef"));
        assert_eq!(session.user().unwrap().role, Role::Chef);

        let restarted = Session::initialize(Box::new(storage.clone()));
        assert!(!restarted.is_authenticated());
        assert_paired(&restarted);
        assert!(storage.get(KEY_TOKEN).is_none());
    }

    #[test]
    fn test_relogin_failed_token_write_leaves_no_pair() {
        let storage = SharedStorage::default();
        let cart = FakeCart::new(true, Ok(json!({"items": []})));

        let mut session = Session::initialize(Box::new(storage.clone()));
        session.login("tok-admin".to_string(), user(1, Role::Admin, None), &cart);
        drop(session);

        let failing = FailingKey {
            inner: storage.clone(),
            key: KEY_TOKEN,
        };
        let mut session = Session::initialize(Box::new(failing));
        session.login("tok-chef".to_string(), user(2, Role::Chef, Some(5)), &cart);

        let restarted = Session::initialize(Box::new(storage));
        assert!(restarted.token().is_none());
        assert!(restarted.user().is_none());
    }

    #[test]
    fn test_dashboard_paths_unique() {
        let mut paths: Vec<_> = Role::ALL.iter().map(|r| r.dashboard_path()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), Role::ALL.len());
    }
}

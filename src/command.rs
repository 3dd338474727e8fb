//! Command registration and dispatch.
//!
//! A command is a name bound to a handler capability. Handlers receive the
//! connection that issued the command and the argument remainder, and must
//! call [`Connection::reply`] exactly once before returning — and must never
//! block, since the whole server shares one thread.

use crate::connection::Connection;
use std::cell::RefCell;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Handler capability invoked for a matched command.
pub type Handler = Rc<dyn Fn(&mut Connection, &str)>;

type Table = RefCell<BTreeMap<String, Handler>>;

/// Name → handler table, one per server.
///
/// The handle is cheap to clone; clones share one table. Entries live for
/// the life of the process and are never removed.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    inner: Rc<Table>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// Registering the same name again with the identical handler (the same
    /// `Rc` allocation) is a no-op.
    ///
    /// # Panics
    /// Panics if `name` is already bound to a different handler: a duplicate
    /// command name is a defect in the hosting program, not a runtime
    /// condition to recover from.
    pub fn register(&self, name: &str, handler: Handler) {
        match self.inner.borrow_mut().entry(name.to_string()) {
            Entry::Occupied(entry) => {
                assert!(
                    Rc::ptr_eq(entry.get(), &handler),
                    "command {name:?} registered twice with different handlers"
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(handler);
            }
        }
    }

    /// Exact-match lookup. Returns a clone of the handler so the table
    /// borrow is released before the handler runs; a handler may therefore
    /// re-enter the registry, as the built-in `help` does.
    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.inner.borrow().get(name).cloned()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.borrow().keys().cloned().collect()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// The built-in `help` handler: replies 214 listing every registered
    /// name. Holds only a weak reference to the table, so the registry can
    /// own its own help entry without leaking.
    pub(crate) fn help_handler(&self) -> Handler {
        let table: Weak<Table> = Rc::downgrade(&self.inner);
        Rc::new(move |conn: &mut Connection, _args: &str| {
            let mut body = String::from("The available commands are:\n");
            if let Some(table) = table.upgrade() {
                for name in table.borrow().keys() {
                    body.push('\t');
                    body.push_str(name);
                    body.push('\n');
                }
            }
            conn.reply(214, &body);
        })
    }
}

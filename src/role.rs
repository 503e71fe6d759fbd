//! # Roles
//! There're exactly 2 of them: writers mutate the resource, readers only look at it.
//! Most of the bookkeeping is "one number per role", hence [PerRole].

use std::ops::{Index, IndexMut};

use strum_macros::{Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Writer,
    Reader,
}

impl Role {
    /// the role that gets the turn once this one's phase is over
    pub fn other(self) -> Role {
        match self {
            Role::Writer => Role::Reader,
            Role::Reader => Role::Writer,
        }
    }
}

/// One value per role, indexed by the role itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerRole<T> {
    pub writer: T,
    pub reader: T,
}

impl<T> PerRole<T> {
    pub const fn new(writer: T, reader: T) -> Self {
        Self { writer, reader }
    }
}

impl<T> Index<Role> for PerRole<T> {
    type Output = T;
    fn index(&self, role: Role) -> &T {
        match role {
            Role::Writer => &self.writer,
            Role::Reader => &self.reader,
        }
    }
}

impl<T> IndexMut<Role> for PerRole<T> {
    fn index_mut(&mut self, role: Role) -> &mut T {
        match role {
            Role::Writer => &mut self.writer,
            Role::Reader => &mut self.reader,
        }
    }
}

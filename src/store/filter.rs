//! # Filter Policy
//!
//! White and black name lists for message and parameter names.
//!
//! The white list always contains a built-in minimum of names the sync
//! engines depend on and only filters once it holds more than that minimum.
//! A name is never on both lists of the same category.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::protocol::names::{BUILTIN_MESSAGES, BUILTIN_PARAMETERS};

/// Category of filtered names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Message,
    Parameter,
}

/// List selected by a `/set/{argument}` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    White,
    Black,
}

impl ListKind {
    /// Parse `white_message`, `black_parameter` ...
    pub fn parse(argument: &str) -> Option<(ListKind, Category)> {
        match argument {
            "white_message" => Some((ListKind::White, Category::Message)),
            "black_message" => Some((ListKind::Black, Category::Message)),
            "white_parameter" => Some((ListKind::White, Category::Parameter)),
            "black_parameter" => Some((ListKind::Black, Category::Parameter)),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("{0} is built in and cannot be listed")]
    Builtin(String),
}

/// White and black lists of one category
#[derive(Debug, Clone, Serialize)]
pub struct NameFilter {
    #[serde(skip)]
    builtin: &'static [&'static str],
    white: BTreeSet<String>,
    black: BTreeSet<String>,
}

impl NameFilter {
    /// Filter that admits every name
    pub fn new(builtin: &'static [&'static str]) -> Self {
        Self {
            builtin,
            white: builtin.iter().map(|name| name.to_string()).collect(),
            black: BTreeSet::new(),
        }
    }

    /// Filter built from configured lists
    ///
    /// Built-in names on the black list are ignored. A name on both lists
    /// ends up on the black list.
    pub fn from_lists(builtin: &'static [&'static str], white: &[String], black: &[String]) -> Self {
        let mut filter = Self::new(builtin);
        for name in white {
            filter.white.insert(name.clone());
        }
        for name in black {
            if !filter.is_builtin(name) {
                filter.white.remove(name);
                filter.black.insert(name.clone());
            }
        }
        filter
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains(&name)
    }

    /// Whether the white list holds more than the built-in minimum
    pub fn white_active(&self) -> bool {
        self.white.len() > self.builtin.len()
    }

    /// Whether `name` passes both lists
    pub fn admits(&self, name: &str) -> bool {
        if self.black.contains(name) {
            return false;
        }
        !self.white_active() || self.white.contains(name)
    }

    pub fn white(&self) -> &BTreeSet<String> {
        &self.white
    }

    pub fn black(&self) -> &BTreeSet<String> {
        &self.black
    }

    /// Replace the white list with the built-in minimum plus `names`
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Builtin`] if any name is built in; the lists
    /// are left untouched.
    pub fn set_white(&mut self, names: &[String]) -> Result<(), FilterError> {
        self.reject_builtin(names)?;

        self.white = self.builtin.iter().map(|name| name.to_string()).collect();
        for name in names {
            self.black.remove(name);
            self.white.insert(name.clone());
        }
        Ok(())
    }

    /// Replace the black list with `names`
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Builtin`] if any name is built in; the lists
    /// are left untouched.
    pub fn set_black(&mut self, names: &[String]) -> Result<(), FilterError> {
        self.reject_builtin(names)?;

        self.black.clear();
        for name in names {
            self.white.remove(name);
            self.black.insert(name.clone());
        }
        Ok(())
    }

    /// Put `name` on the white list and take it off the black list
    pub fn mark(&mut self, name: &str) {
        self.black.remove(name);
        self.white.insert(name.to_string());
    }

    fn reject_builtin(&self, names: &[String]) -> Result<(), FilterError> {
        match names.iter().find(|name| self.is_builtin(name)) {
            Some(name) => Err(FilterError::Builtin(name.clone())),
            None => Ok(()),
        }
    }
}

/// Message and parameter filters
#[derive(Debug, Clone, Serialize)]
pub struct FilterLists {
    pub message: NameFilter,
    pub parameter: NameFilter,
}

impl Default for FilterLists {
    fn default() -> Self {
        Self {
            message: NameFilter::new(BUILTIN_MESSAGES),
            parameter: NameFilter::new(BUILTIN_PARAMETERS),
        }
    }
}

impl FilterLists {
    pub fn get(&self, category: Category) -> &NameFilter {
        match category {
            Category::Message => &self.message,
            Category::Parameter => &self.parameter,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut NameFilter {
        match category {
            Category::Message => &mut self.message,
            Category::Parameter => &mut self.parameter,
        }
    }

    /// Apply a white or black list update to one category
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Builtin`] if any name is built in
    pub fn set(&mut self, kind: ListKind, category: Category, names: &[String]) -> Result<(), FilterError> {
        let filter = self.get_mut(category);
        match kind {
            ListKind::White => filter.set_white(names),
            ListKind::Black => filter.set_black(names),
        }
    }
}

//! "Show me another" browsing over a ranked match list.
//!
//! A session is a fixed ordering of catalog entries plus a cursor. Each
//! `next` step first tries to stay in the current entry's category by jumping
//! to a random other entry of the same category; only when the category has
//! no other member does the cursor advance by one, wrapping at the end.
//!
//! Session state lives behind [`SessionStore`]. Two concurrent `next` calls
//! on the same token race: both read the same state and the later `put`
//! wins. No ordering is guaranteed between them.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::category::category_of;
use crate::index::SimilarityIndex;
use crate::matcher::RankedMatch;

/// Where a session's match list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowseOrigin {
    /// Ranked by similarity to the uploaded portrait.
    Ranked,
    /// The whole catalog in index order, with no similarity ranking at all.
    /// Only produced when a `next` request arrives without session state.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseError {
    /// A session cannot be created over an empty match list.
    EmptyMatches,
    /// Recovery needs at least one catalog entry.
    EmptyCatalog,
    /// A match list named an identifier the catalog does not hold.
    UnknownIdentifier(String),
    UnknownPosition(u32),
    /// Entry positions are stored as `u32`.
    CatalogTooLarge(usize),
}

impl fmt::Display for BrowseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMatches => write!(f, "cannot browse an empty match list"),
            Self::EmptyCatalog => write!(f, "cannot recover a session from an empty catalog"),
            Self::UnknownIdentifier(identifier) => {
                write!(f, "identifier '{identifier}' is not in the catalog")
            }
            Self::UnknownPosition(position) => {
                write!(f, "position {position} is outside the catalog")
            }
            Self::CatalogTooLarge(entries) => {
                write!(f, "catalog of {entries} entries is too large to browse")
            }
        }
    }
}

impl Error for BrowseError {}

/// The entry a session currently points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseStep {
    pub identifier: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStatus {
    Ranked,
    /// The session is browsing the unranked fallback list.
    Fallback,
    /// No state existed for the token; this call created the fallback list.
    RecoveredFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextOutcome {
    /// Token the session now lives under. Differs from the presented one
    /// only when the session had to be recovered.
    pub token: String,
    pub step: BrowseStep,
    pub status: NextStatus,
}

/// Catalog identifiers in index order, with every entry's category resolved
/// once up front.
///
/// Sessions refer to entries by position into this list, so they never own
/// identifier strings and stepping never re-derives a category.
#[derive(Debug)]
pub struct BrowseCatalog {
    identifiers: Vec<String>,
    category_names: Vec<String>,
    categories: Vec<u32>,
    fallback: Arc<[u32]>,
}

impl BrowseCatalog {
    pub fn new(index: &SimilarityIndex) -> Result<Self, BrowseError> {
        let entries = index.len();
        let total = u32::try_from(entries).map_err(|_| BrowseError::CatalogTooLarge(entries))?;

        let identifiers = index.identifiers();
        let mut category_names = Vec::new();
        let mut interned: HashMap<String, u32> = HashMap::new();
        let mut categories = Vec::with_capacity(entries);
        for identifier in &identifiers {
            let name = category_of(identifier);
            let next_id = category_names.len() as u32;
            let id = *interned.entry(name.clone()).or_insert_with(|| {
                category_names.push(name);
                next_id
            });
            categories.push(id);
        }

        Ok(Self {
            identifiers,
            category_names,
            categories,
            fallback: (0..total).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Number of distinct categories.
    pub fn category_count(&self) -> usize {
        self.category_names.len()
    }

    /// Position of `identifier`, relying on index order being sorted.
    pub fn position(&self, identifier: &str) -> Option<u32> {
        self.identifiers
            .binary_search_by(|candidate| candidate.as_str().cmp(identifier))
            .ok()
            .and_then(|position| u32::try_from(position).ok())
    }

    fn category_id(&self, position: u32) -> u32 {
        self.categories[position as usize]
    }

    fn step(&self, position: u32) -> BrowseStep {
        let position = position as usize;
        BrowseStep {
            identifier: self.identifiers[position].clone(),
            category: self.category_names[self.categories[position] as usize].clone(),
        }
    }
}

/// A session: an ordering of catalog positions plus a cursor.
///
/// The ordering is shared, so cloning a state out of a store copies no
/// entries. Every fallback session shares the catalog's single list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseState {
    order: Arc<[u32]>,
    cursor: usize,
    origin: BrowseOrigin,
}

impl BrowseState {
    pub fn new(
        order: Arc<[u32]>,
        origin: BrowseOrigin,
        catalog: &BrowseCatalog,
    ) -> Result<Self, BrowseError> {
        if order.is_empty() {
            return Err(BrowseError::EmptyMatches);
        }
        if let Some(&position) = order
            .iter()
            .find(|&&position| position as usize >= catalog.len())
        {
            return Err(BrowseError::UnknownPosition(position));
        }
        Ok(Self {
            order,
            cursor: 0,
            origin,
        })
    }

    pub fn from_ranked(
        ranked: &[RankedMatch],
        catalog: &BrowseCatalog,
    ) -> Result<Self, BrowseError> {
        let order = ranked
            .iter()
            .map(|entry| {
                catalog
                    .position(&entry.identifier)
                    .ok_or_else(|| BrowseError::UnknownIdentifier(entry.identifier.clone()))
            })
            .collect::<Result<Arc<[u32]>, _>>()?;
        Self::new(order, BrowseOrigin::Ranked, catalog)
    }

    /// The degraded list used when a session has to be recovered: every
    /// catalog identifier in index order. It carries no similarity ranking.
    pub fn fallback(catalog: &BrowseCatalog) -> Result<Self, BrowseError> {
        if catalog.is_empty() {
            return Err(BrowseError::EmptyCatalog);
        }
        let order = Arc::clone(&catalog.fallback);
        Self::new(order, BrowseOrigin::Fallback, catalog)
    }

    /// Catalog positions in browse order.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn origin(&self) -> BrowseOrigin {
        self.origin
    }

    pub fn current(&self, catalog: &BrowseCatalog) -> BrowseStep {
        catalog.step(self.order[self.cursor])
    }

    /// Moves the cursor once and returns the new current entry.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        catalog: &BrowseCatalog,
        rng: &mut R,
    ) -> BrowseStep {
        let current_category = catalog.category_id(self.order[self.cursor]);
        let alternates: Vec<usize> = self
            .order
            .iter()
            .enumerate()
            .filter(|&(position, &entry)| {
                position != self.cursor && catalog.category_id(entry) == current_category
            })
            .map(|(position, _)| position)
            .collect();

        self.cursor = match alternates.choose(rng) {
            Some(&position) => position,
            None => (self.cursor + 1) % self.order.len(),
        };
        self.current(catalog)
    }
}

/// Storage for browse sessions keyed by an opaque token.
///
/// Expiry is the store's own business; an expired session reads as `None`.
pub trait SessionStore: Send + Sync {
    fn get(&self, token: &str) -> Option<BrowseState>;
    fn put(&self, token: &str, state: BrowseState);
}

/// Creates a session over `ranked` and returns its first entry.
pub fn start(
    store: &dyn SessionStore,
    token: &str,
    catalog: &BrowseCatalog,
    ranked: &[RankedMatch],
) -> Result<BrowseStep, BrowseError> {
    let state = BrowseState::from_ranked(ranked, catalog)?;
    let step = state.current(catalog);
    store.put(token, state);
    Ok(step)
}

/// Advances the session stored under `presented`.
///
/// The store is read once. A missing, unknown or expired session is
/// recovered with [`BrowseState::fallback`] under a token from
/// `issue_token`, advanced once, and marked
/// [`NextStatus::RecoveredFallback`]; callers must not present such a result
/// as a similarity match.
pub fn next<R: Rng + ?Sized>(
    store: &dyn SessionStore,
    presented: Option<&str>,
    issue_token: impl FnOnce() -> String,
    catalog: &BrowseCatalog,
    rng: &mut R,
) -> Result<NextOutcome, BrowseError> {
    let resumed = presented.and_then(|token| store.get(token).map(|state| (token, state)));
    let (token, mut state, recovered) = match resumed {
        Some((token, state)) => (token.to_string(), state, false),
        None => {
            let state = BrowseState::fallback(catalog)?;
            (issue_token(), state, true)
        }
    };

    let step = state.advance(catalog, rng);
    let status = match (recovered, state.origin()) {
        (true, _) => NextStatus::RecoveredFallback,
        (false, BrowseOrigin::Ranked) => NextStatus::Ranked,
        (false, BrowseOrigin::Fallback) => NextStatus::Fallback,
    };
    store.put(&token, state);

    Ok(NextOutcome {
        token,
        step,
        status,
    })
}

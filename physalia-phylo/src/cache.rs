//! Pooled storage for per-branch conditional likelihoods.
//!
//! The pool owns a set of *locations*, each a [`BranchCache`] of per-column
//! conditional-likelihood matrices for one directed branch. MCMC snapshots
//! hold *tokens*: a token maps each directed branch to a location, and two
//! tokens may share a location while their cached likelihoods agree. This
//! makes proposal snapshots O(1) (copy the mapping, bump the reference
//! counts) and rejection a token swap.
//!
//! Invariant: `refcount[loc]` equals the number of tokens mapping some
//! branch to `loc`; a location on the free stack has refcount zero.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::Array2;
use physalia_core::{ExtReal, PhysaliaError, Result};

use crate::tree::Tree;

/// Cached conditional likelihoods for one branch: one
/// `(n_models, n_states)` matrix per alignment column, plus the scalar
/// factor from substitutions elsewhere.
#[derive(Debug, Clone)]
pub struct BranchCache {
    pub columns: Vec<Array2<f64>>,
    pub other_subst: ExtReal,
}

impl BranchCache {
    fn new(n_columns: usize, n_models: usize, n_states: usize) -> Self {
        BranchCache {
            columns: vec![Array2::zeros((n_models, n_states)); n_columns],
            other_subst: ExtReal::one(),
        }
    }

    fn reset(&mut self, n_columns: usize, n_models: usize, n_states: usize) {
        self.columns
            .resize(n_columns, Array2::zeros((n_models, n_states)));
        for m in &mut self.columns {
            m.fill(0.0);
        }
        self.other_subst = ExtReal::one();
    }
}

/// The shared pool of branch caches, indexed by token and directed branch.
#[derive(Debug)]
pub struct MultiLikelihoodCache {
    n_models: usize,
    n_states: usize,
    locations: Vec<BranchCache>,
    refcount: Vec<usize>,
    valid: Vec<bool>,
    free_stack: Vec<usize>,
    /// `mapping[token][branch] -> location`.
    mapping: Vec<Vec<Option<usize>>>,
    active: Vec<bool>,
    /// Columns per token.
    length: Vec<usize>,
    /// May the token reuse its previously computed total likelihood?
    cv_valid: Vec<bool>,
}

impl MultiLikelihoodCache {
    pub fn new(n_models: usize, n_states: usize) -> Self {
        MultiLikelihoodCache {
            n_models,
            n_states,
            locations: Vec::new(),
            refcount: Vec::new(),
            valid: Vec::new(),
            free_stack: Vec::new(),
            mapping: Vec::new(),
            active: Vec::new(),
            length: Vec::new(),
            cv_valid: Vec::new(),
        }
    }

    pub fn n_models(&self) -> usize {
        self.n_models
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_locations(&self) -> usize {
        self.locations.len()
    }

    /// Acquire a token for `n_columns` columns over `n_directed_branches`
    /// branches. All branches start unmapped.
    pub fn claim_token(&mut self, n_columns: usize, n_directed_branches: usize) -> usize {
        let token = match (0..self.active.len()).find(|&t| !self.active[t]) {
            Some(t) => t,
            None => {
                self.mapping.push(Vec::new());
                self.active.push(false);
                self.length.push(0);
                self.cv_valid.push(false);
                self.active.len() - 1
            }
        };
        self.mapping[token] = vec![None; n_directed_branches];
        self.active[token] = true;
        self.length[token] = n_columns;
        self.cv_valid[token] = false;
        token
    }

    /// Reset a token: zero length, no mapped branches.
    pub fn init_token(&mut self, token: usize) -> Result<()> {
        self.check_token(token)?;
        let n_branches = self.mapping[token].len();
        for b in 0..n_branches {
            self.unmap(token, b);
        }
        self.length[token] = 0;
        self.cv_valid[token] = false;
        Ok(())
    }

    /// Point `dst` at the same locations as `src`, duplicating its length.
    /// Shared locations get one more user each.
    pub fn copy_token(&mut self, src: usize, dst: usize) -> Result<()> {
        self.check_token(src)?;
        self.check_token(dst)?;
        // Drop whatever dst held before.
        let n_branches = self.mapping[dst].len();
        for b in 0..n_branches {
            self.unmap(dst, b);
        }

        self.mapping[dst] = self.mapping[src].clone();
        for loc in self.mapping[dst].iter().flatten() {
            self.refcount[*loc] += 1;
        }
        self.length[dst] = self.length[src];
        self.cv_valid[dst] = self.cv_valid[src];
        Ok(())
    }

    /// Ensure `(token, branch)` has backing store. A no-op when already
    /// mapped; otherwise a free location is reused or a new one grown.
    pub fn allocate_location(&mut self, token: usize, branch: usize) -> Result<()> {
        self.check_branch(token, branch)?;
        if self.mapping[token][branch].is_some() {
            return Ok(());
        }
        let n_columns = self.length[token];
        let loc = match self.free_stack.pop() {
            Some(loc) => {
                self.locations[loc].reset(n_columns, self.n_models, self.n_states);
                loc
            }
            None => {
                self.locations
                    .push(BranchCache::new(n_columns, self.n_models, self.n_states));
                self.refcount.push(0);
                self.valid.push(false);
                self.locations.len() - 1
            }
        };
        self.refcount[loc] = 1;
        self.valid[loc] = false;
        self.mapping[token][branch] = Some(loc);
        Ok(())
    }

    /// Where the token stores the branch.
    ///
    /// # Errors
    ///
    /// `Structure` when the branch has no backing store; querying an
    /// unallocated branch is a programmer error.
    pub fn location(&self, token: usize, branch: usize) -> Result<usize> {
        self.check_branch(token, branch)?;
        self.mapping[token][branch].ok_or_else(|| {
            PhysaliaError::Structure(format!(
                "token {token} branch {branch} has no allocated location"
            ))
        })
    }

    pub fn branch_available(&self, token: usize, branch: usize) -> bool {
        self.mapping
            .get(token)
            .and_then(|row| row.get(branch))
            .is_some_and(|loc| loc.is_some())
    }

    pub fn up_to_date(&self, token: usize, branch: usize) -> bool {
        self.mapping
            .get(token)
            .and_then(|row| row.get(branch))
            .and_then(|loc| *loc)
            .is_some_and(|loc| self.valid[loc])
    }

    /// Mark a branch's cached likelihoods current after recomputation.
    pub fn validate_branch(&mut self, token: usize, branch: usize) -> Result<()> {
        let loc = self.location(token, branch)?;
        self.valid[loc] = true;
        Ok(())
    }

    /// Mark one branch stale, unsharing first: a shared location is
    /// dropped from this token rather than poisoned for its other users.
    pub fn invalidate_one_branch(&mut self, token: usize, branch: usize) -> Result<()> {
        self.check_branch(token, branch)?;
        if let Some(loc) = self.mapping[token][branch] {
            if self.refcount[loc] > 1 {
                self.refcount[loc] -= 1;
                self.mapping[token][branch] = None;
            } else {
                self.valid[loc] = false;
            }
        }
        self.cv_valid[token] = false;
        Ok(())
    }

    /// Mark every branch of the token stale.
    pub fn invalidate_all(&mut self, token: usize) -> Result<()> {
        self.check_token(token)?;
        for b in 0..self.mapping[token].len() {
            self.invalidate_one_branch(token, b)?;
        }
        Ok(())
    }

    /// Mark `b`, its reversal, and every directed branch beyond either
    /// stale. The traversal comes from the tree; the cache itself knows
    /// nothing of topology.
    pub fn invalidate_branch_tree(&mut self, token: usize, b: usize, tree: &Tree) -> Result<()> {
        self.invalidate_one_branch(token, b)?;
        self.invalidate_one_branch(token, tree.reverse(b))?;
        for after in tree.branches_after(b) {
            self.invalidate_one_branch(token, after)?;
        }
        for after in tree.branches_after(tree.reverse(b)) {
            self.invalidate_one_branch(token, after)?;
        }
        Ok(())
    }

    /// Release every location the token holds and retire the token.
    pub fn release_token(&mut self, token: usize) -> Result<()> {
        self.check_token(token)?;
        let n_branches = self.mapping[token].len();
        for b in 0..n_branches {
            self.unmap(token, b);
        }
        self.mapping[token].clear();
        self.active[token] = false;
        self.length[token] = 0;
        self.cv_valid[token] = false;
        Ok(())
    }

    pub fn get_length(&self, token: usize) -> usize {
        self.length[token]
    }

    pub fn set_length(&mut self, token: usize, n_columns: usize) -> Result<()> {
        self.check_token(token)?;
        self.length[token] = n_columns;
        Ok(())
    }

    pub fn cv_valid(&self, token: usize) -> bool {
        self.cv_valid[token]
    }

    pub fn set_cv_valid(&mut self, token: usize, valid: bool) {
        self.cv_valid[token] = valid;
    }

    /// Read a branch's cache.
    pub fn branch_cache(&self, token: usize, branch: usize) -> Result<&BranchCache> {
        let loc = self.location(token, branch)?;
        Ok(&self.locations[loc])
    }

    /// Write access to a branch's cache. Refuses when the location is
    /// shared: writers must unshare through
    /// [`MultiLikelihoodCache::invalidate_one_branch`] and
    /// [`MultiLikelihoodCache::allocate_location`] first.
    pub fn branch_cache_mut(&mut self, token: usize, branch: usize) -> Result<&mut BranchCache> {
        let loc = self.location(token, branch)?;
        if self.refcount[loc] > 1 {
            return Err(PhysaliaError::Structure(format!(
                "writing through a location shared by {} tokens",
                self.refcount[loc]
            )));
        }
        Ok(&mut self.locations[loc])
    }

    pub fn refcount_of(&self, token: usize, branch: usize) -> Result<usize> {
        let loc = self.location(token, branch)?;
        Ok(self.refcount[loc])
    }

    /// Verify the refcount invariant over the whole pool.
    pub fn check_invariants(&self) -> Result<()> {
        for loc in 0..self.locations.len() {
            let users = self
                .mapping
                .iter()
                .enumerate()
                .filter(|(t, _)| self.active[*t])
                .filter(|(_, row)| row.iter().any(|&l| l == Some(loc)))
                .count();
            if users != self.refcount[loc] {
                return Err(PhysaliaError::Structure(format!(
                    "location {loc} has refcount {} but {users} users",
                    self.refcount[loc]
                )));
            }
            if self.free_stack.contains(&loc) && self.refcount[loc] != 0 {
                return Err(PhysaliaError::Structure(format!(
                    "free location {loc} has refcount {}",
                    self.refcount[loc]
                )));
            }
        }
        Ok(())
    }

    fn unmap(&mut self, token: usize, branch: usize) {
        if let Some(loc) = self.mapping[token][branch].take() {
            self.refcount[loc] -= 1;
            if self.refcount[loc] == 0 {
                self.valid[loc] = false;
                self.free_stack.push(loc);
            }
        }
    }

    fn check_token(&self, token: usize) -> Result<()> {
        if token >= self.mapping.len() || !self.active[token] {
            return Err(PhysaliaError::index("token", token, self.mapping.len()));
        }
        Ok(())
    }

    fn check_branch(&self, token: usize, branch: usize) -> Result<()> {
        self.check_token(token)?;
        if branch >= self.mapping[token].len() {
            return Err(PhysaliaError::index(
                "directed branch",
                branch,
                self.mapping[token].len(),
            ));
        }
        Ok(())
    }
}

/// One token's view into a shared pool: the likelihood cache of a single
/// MCMC snapshot. Cloning claims a fresh token sharing every location;
/// dropping releases the token.
#[derive(Debug)]
pub struct LikelihoodCache {
    pool: Rc<RefCell<MultiLikelihoodCache>>,
    token: usize,
    n_directed_branches: usize,
    /// Peeling root for likelihood computations.
    pub root: usize,
    /// The total likelihood computed when `cv_valid` was last set.
    pub cached_value: ExtReal,
}

impl LikelihoodCache {
    pub fn new(
        pool: Rc<RefCell<MultiLikelihoodCache>>,
        n_columns: usize,
        n_directed_branches: usize,
        root: usize,
    ) -> Self {
        let token = pool.borrow_mut().claim_token(n_columns, n_directed_branches);
        LikelihoodCache {
            pool,
            token,
            n_directed_branches,
            root,
            cached_value: ExtReal::one(),
        }
    }

    pub fn pool(&self) -> &Rc<RefCell<MultiLikelihoodCache>> {
        &self.pool
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn n_directed_branches(&self) -> usize {
        self.n_directed_branches
    }

    pub fn length(&self) -> usize {
        self.pool.borrow().get_length(self.token)
    }

    pub fn branch_available(&self, b: usize) -> bool {
        self.pool.borrow().branch_available(self.token, b)
    }

    pub fn up_to_date(&self, b: usize) -> bool {
        self.pool.borrow().up_to_date(self.token, b)
    }

    pub fn prepare_branch(&self, b: usize) -> Result<()> {
        self.pool.borrow_mut().allocate_location(self.token, b)
    }

    pub fn validate_branch(&self, b: usize) -> Result<()> {
        self.pool.borrow_mut().validate_branch(self.token, b)
    }

    pub fn invalidate_one_branch(&self, b: usize) -> Result<()> {
        self.pool.borrow_mut().invalidate_one_branch(self.token, b)
    }

    pub fn invalidate_all(&self) -> Result<()> {
        self.pool.borrow_mut().invalidate_all(self.token)
    }

    pub fn invalidate_branch_tree(&self, b: usize, tree: &Tree) -> Result<()> {
        self.pool
            .borrow_mut()
            .invalidate_branch_tree(self.token, b, tree)
    }

    pub fn cv_valid(&self) -> bool {
        self.pool.borrow().cv_valid(self.token)
    }

    pub fn set_cv_valid(&self, valid: bool) {
        self.pool.borrow_mut().set_cv_valid(self.token, valid);
    }
}

impl Clone for LikelihoodCache {
    fn clone(&self) -> Self {
        let mut pool = self.pool.borrow_mut();
        let n_columns = pool.get_length(self.token);
        let token = pool.claim_token(n_columns, self.n_directed_branches);
        // Sharing every location makes the snapshot O(1).
        pool.copy_token(self.token, token)
            .unwrap_or_else(|_| unreachable!("freshly claimed token accepts copy"));
        drop(pool);
        LikelihoodCache {
            pool: Rc::clone(&self.pool),
            token,
            n_directed_branches: self.n_directed_branches,
            root: self.root,
            cached_value: self.cached_value,
        }
    }
}

impl Drop for LikelihoodCache {
    fn drop(&mut self) {
        if let Ok(mut pool) = self.pool.try_borrow_mut() {
            let _ = pool.release_token(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Rc<RefCell<MultiLikelihoodCache>> {
        Rc::new(RefCell::new(MultiLikelihoodCache::new(2, 4)))
    }

    #[test]
    fn claim_and_allocate() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t = c.claim_token(10, 4);
        assert_eq!(c.get_length(t), 10);
        assert!(!c.branch_available(t, 0));

        c.allocate_location(t, 0).unwrap();
        assert!(c.branch_available(t, 0));
        assert!(!c.up_to_date(t, 0));
        assert_eq!(c.refcount_of(t, 0).unwrap(), 1);
        assert_eq!(c.branch_cache(t, 0).unwrap().columns.len(), 10);
        c.check_invariants().unwrap();
    }

    #[test]
    fn copy_token_shares_every_location() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t1 = c.claim_token(5, 4);
        for b in 0..4 {
            c.allocate_location(t1, b).unwrap();
            c.validate_branch(t1, b).unwrap();
        }

        let t2 = c.claim_token(5, 4);
        c.copy_token(t1, t2).unwrap();
        for b in 0..4 {
            assert_eq!(c.refcount_of(t1, b).unwrap(), 2);
            assert_eq!(
                c.location(t1, b).unwrap(),
                c.location(t2, b).unwrap()
            );
        }
        assert_eq!(c.get_length(t2), 5);
        c.check_invariants().unwrap();
    }

    #[test]
    fn invalidation_unshares_before_poisoning() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t1 = c.claim_token(5, 4);
        for b in 0..4 {
            c.allocate_location(t1, b).unwrap();
            c.validate_branch(t1, b).unwrap();
        }
        let t2 = c.claim_token(5, 4);
        c.copy_token(t1, t2).unwrap();

        // Shared location: t2 drops its mapping, t1 keeps a valid entry.
        c.invalidate_one_branch(t2, 1).unwrap();
        assert_eq!(c.refcount_of(t1, 1).unwrap(), 1);
        assert!(c.up_to_date(t1, 1));
        assert!(!c.branch_available(t2, 1));
        assert!(!c.cv_valid(t2));

        // Unshared location: invalidated in place.
        c.invalidate_one_branch(t2, 1).unwrap(); // no mapping: only cv flag
        c.allocate_location(t2, 1).unwrap();
        c.validate_branch(t2, 1).unwrap();
        c.invalidate_one_branch(t2, 1).unwrap();
        assert!(c.branch_available(t2, 1));
        assert!(!c.up_to_date(t2, 1));
        c.check_invariants().unwrap();
    }

    #[test]
    fn shared_locations_refuse_writers() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t1 = c.claim_token(3, 2);
        c.allocate_location(t1, 0).unwrap();
        let t2 = c.claim_token(3, 2);
        c.copy_token(t1, t2).unwrap();

        assert!(c.branch_cache_mut(t1, 0).is_err());
        c.invalidate_one_branch(t2, 0).unwrap();
        assert!(c.branch_cache_mut(t1, 0).is_ok());
    }

    #[test]
    fn release_recycles_locations() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t1 = c.claim_token(5, 4);
        for b in 0..4 {
            c.allocate_location(t1, b).unwrap();
        }
        let n_locations = c.n_locations();
        c.release_token(t1).unwrap();
        c.check_invariants().unwrap();

        // A fresh token reuses both the token slot and the locations.
        let t2 = c.claim_token(7, 4);
        assert_eq!(t2, t1);
        for b in 0..4 {
            c.allocate_location(t2, b).unwrap();
            assert_eq!(c.branch_cache(t2, b).unwrap().columns.len(), 7);
        }
        assert_eq!(c.n_locations(), n_locations);
        c.check_invariants().unwrap();
    }

    #[test]
    fn init_token_resets_length_and_mappings() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t = c.claim_token(5, 4);
        c.allocate_location(t, 2).unwrap();
        c.init_token(t).unwrap();
        assert_eq!(c.get_length(t), 0);
        assert!(!c.branch_available(t, 2));
        c.check_invariants().unwrap();
    }

    #[test]
    fn unallocated_query_is_a_structure_error() {
        let p = pool();
        let mut c = p.borrow_mut();
        let t = c.claim_token(5, 4);
        assert!(matches!(
            c.location(t, 0),
            Err(PhysaliaError::Structure(_))
        ));
        assert!(matches!(
            c.branch_cache(t, 0),
            Err(PhysaliaError::Structure(_))
        ));
        assert!(c.location(t, 99).is_err());
        c.release_token(t).unwrap();
        assert!(c.location(t, 0).is_err());
    }

    #[test]
    fn invalidate_branch_tree_covers_both_directions() {
        let tree = Tree::from_edges(6, &[(0, 4), (1, 4), (2, 5), (3, 5), (4, 5)]).unwrap();
        let p = pool();
        let mut c = p.borrow_mut();
        let t = c.claim_token(3, tree.n_directed_branches());
        for b in 0..tree.n_directed_branches() {
            c.allocate_location(t, b).unwrap();
            c.validate_branch(t, b).unwrap();
        }

        let internal = (0..tree.n_directed_branches())
            .find(|&b| tree.source(b) == 4 && tree.target(b) == 5)
            .unwrap();
        c.invalidate_branch_tree(t, internal, &tree).unwrap();

        // The edge itself plus everything pointing away from it is stale.
        assert!(!c.up_to_date(t, internal));
        assert!(!c.up_to_date(t, tree.reverse(internal)));
        for b in tree.branches_after(internal) {
            assert!(!c.up_to_date(t, b));
        }
        for b in tree.branches_after(tree.reverse(internal)) {
            assert!(!c.up_to_date(t, b));
        }
        // Branches pointing toward the edge keep their caches.
        let toward = tree.branches_out_of(0)[0];
        assert!(c.up_to_date(t, toward));
    }

    #[test]
    fn view_clone_snapshots_and_drop_releases() {
        let p = pool();
        let view = LikelihoodCache::new(Rc::clone(&p), 6, 4, 0);
        for b in 0..4 {
            view.prepare_branch(b).unwrap();
            view.validate_branch(b).unwrap();
        }

        let snapshot = view.clone();
        assert_ne!(view.token(), snapshot.token());
        {
            let c = p.borrow();
            for b in 0..4 {
                assert_eq!(c.refcount_of(view.token(), b).unwrap(), 2);
            }
            c.check_invariants().unwrap();
        }

        drop(snapshot);
        {
            let c = p.borrow();
            for b in 0..4 {
                assert_eq!(c.refcount_of(view.token(), b).unwrap(), 1);
            }
            c.check_invariants().unwrap();
        }
    }
}

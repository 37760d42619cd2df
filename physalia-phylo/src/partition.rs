//! Data partitions and the aggregate sampling model.
//!
//! A [`DataPartition`] ties one alignment to one tree, one substitution
//! mixture and one indel model, and computes its substitution likelihood by
//! Felsenstein peeling over cached per-branch conditionals: only branches
//! whose caches were invalidated since the last query are recomputed.
//! [`Parameters`] aggregates partitions into the single probability model
//! the samplers drive, carrying the chain temperature `beta`.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::Array2;
use physalia_core::{CowPtr, ExtReal, PhysaliaError, Result, Value};
use physalia_model::densities::exponential_pdf;
use physalia_model::{Bounds, Model, ParamTable, Parameter, ProbabilityModel};

use physalia_align::{DpMatrix, PairHmm};

use crate::alignment::Alignment;
use crate::cache::{LikelihoodCache, MultiLikelihoodCache};
use crate::indel::IndelModel;
use crate::subst::SubstitutionModel;
use crate::tree::Tree;

/// One aligned data set with its evolutionary model and cached
/// conditional likelihoods.
///
/// Taxon `t` of the alignment sits at leaf node `t` of the tree. The one
/// model parameter is the branch-mean scale `mu`: effective branch lengths
/// are `tree length x mu`.
#[derive(Clone)]
pub struct DataPartition {
    name: String,
    table: ParamTable,
    tree: CowPtr<Tree>,
    alignment: CowPtr<Alignment>,
    subst: Rc<dyn SubstitutionModel>,
    indel: Rc<dyn IndelModel>,
    cache: LikelihoodCache,
}

impl DataPartition {
    pub fn new(
        name: &str,
        tree: Tree,
        alignment: Alignment,
        subst: Rc<dyn SubstitutionModel>,
        indel: Rc<dyn IndelModel>,
        pool: Rc<RefCell<MultiLikelihoodCache>>,
    ) -> Result<Self> {
        let leaves = tree.leaves();
        if leaves.len() != alignment.n_taxa() {
            return Err(PhysaliaError::InvalidInput(format!(
                "{} taxa aligned over a tree with {} leaves",
                alignment.n_taxa(),
                leaves.len()
            )));
        }
        for (t, &leaf) in leaves.iter().enumerate() {
            if leaf != t {
                return Err(PhysaliaError::InvalidInput(
                    "leaves must occupy node indices 0..n_taxa".into(),
                ));
            }
        }
        {
            let p = pool.borrow();
            if p.n_models() != subst.n_models() || p.n_states() != subst.n_states() {
                return Err(PhysaliaError::Structure(format!(
                    "cache pool shaped {}x{} but model is {}x{}",
                    p.n_models(),
                    p.n_states(),
                    subst.n_models(),
                    subst.n_states()
                )));
            }
        }

        let root = tree.n_nodes() - 1;
        let cache = LikelihoodCache::new(
            pool,
            alignment.n_columns(),
            tree.n_directed_branches(),
            root,
        );

        let mut table = ParamTable::new();
        table.add(
            Parameter::with_value("mu", 1.0).bounded(Bounds::lower_bound(0.0)),
        )?;

        Ok(DataPartition {
            name: name.to_string(),
            table,
            tree: CowPtr::new(tree),
            alignment: CowPtr::new(alignment),
            subst,
            indel,
            cache,
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn alignment(&self) -> &Alignment {
        &self.alignment
    }

    pub fn cache(&self) -> &LikelihoodCache {
        &self.cache
    }

    /// The branch-mean scale.
    pub fn mu(&self) -> f64 {
        self.table.value_f64(0).unwrap_or(1.0)
    }

    /// Effective evolutionary distance across a directed branch.
    pub fn effective_length(&self, b: usize) -> f64 {
        self.tree.branch_length(b) * self.mu()
    }

    /// Change one branch length, invalidating exactly the caches that
    /// depend on it.
    pub fn set_branch_length(&mut self, b: usize, length: f64) -> Result<()> {
        self.tree.make_mut().set_branch_length(b, length)?;
        self.cache.invalidate_branch_tree(b, &self.tree)
    }

    /// The indel pair HMM across a directed branch.
    pub fn branch_hmm(&self, b: usize) -> Result<PairHmm> {
        self.indel.pair_hmm(self.effective_length(b))
    }

    /// The indel-model prior of the alignment, for a two-taxon partition:
    /// the probability of its implied pair-HMM path across the single
    /// branch. Partitions with more taxa score one here; their alignment
    /// moves live outside this crate.
    pub fn alignment_prior(&self) -> Result<ExtReal> {
        if self.alignment.n_taxa() != 2 {
            return Ok(ExtReal::one());
        }
        let b = self.tree.branches_out_of(0)[0];
        let hmm = self.branch_hmm(b)?;

        let mut path = Vec::with_capacity(self.alignment.n_columns());
        for c in 0..self.alignment.n_columns() {
            let col = self.alignment.column(c)?;
            let state = match (col[0].is_some(), col[1].is_some()) {
                (true, true) => 0,
                (true, false) => 1,
                (false, true) => 2,
                (false, false) => continue,
            };
            path.push(state);
        }

        let l1 = self.alignment.sequence(0)?.len();
        let l2 = self.alignment.sequence(1)?.len();
        let matrix = DpMatrix::new(l1, l2, hmm, 1.0)?;
        matrix.path_p(&path)
    }

    /// Branches feeding directed branch `b`: the branches into its source
    /// from every other neighbor.
    fn dependencies(&self, b: usize) -> Vec<usize> {
        self.tree
            .branches_out_of(self.tree.source(b))
            .into_iter()
            .filter(|&c| c != b)
            .map(|c| self.tree.reverse(c))
            .collect()
    }

    /// Probability of the column letter at a node given ancestral letter
    /// `x`: indicator for a resolved leaf, one for gaps and internal
    /// nodes.
    fn leaf_factor(&self, node: usize, column: usize, x: usize) -> Result<f64> {
        if node < self.alignment.n_taxa() {
            match self.alignment.entry(column, node)? {
                Some(letter) => Ok(if letter == x { 1.0 } else { 0.0 }),
                None => Ok(1.0),
            }
        } else {
            Ok(1.0)
        }
    }

    /// Bring the conditional likelihoods for directed branch `b` up to
    /// date, recursively recomputing stale dependencies first.
    fn ensure_branch(&self, b: usize) -> Result<()> {
        if self.cache.up_to_date(b) {
            return Ok(());
        }
        let deps = self.dependencies(b);
        for &dep in &deps {
            self.ensure_branch(dep)?;
        }

        let n_models = self.subst.n_models();
        let n_states = self.subst.n_states();
        let n_columns = self.alignment.n_columns();
        let u = self.tree.source(b);
        let t = self.effective_length(b);

        let transition: Vec<Array2<f64>> = (0..n_models)
            .map(|m| self.subst.transition_p(t, m))
            .collect();

        // Phase one: compute the new conditionals while reading the
        // dependencies' caches.
        let mut columns = vec![Array2::zeros((n_models, n_states)); n_columns];
        {
            let pool = self.cache.pool().borrow();
            let token = self.cache.token();
            let dep_caches: Vec<&crate::cache::BranchCache> = deps
                .iter()
                .map(|&dep| pool.branch_cache(token, dep))
                .collect::<Result<_>>()?;

            for (col, out) in columns.iter_mut().enumerate() {
                for m in 0..n_models {
                    for a in 0..n_states {
                        let mut sum = 0.0;
                        for x in 0..n_states {
                            let mut below = self.leaf_factor(u, col, x)?;
                            for dep in &dep_caches {
                                below *= dep.columns[col][(m, x)];
                            }
                            sum += transition[m][(a, x)] * below;
                        }
                        out[(m, a)] = sum;
                    }
                }
            }
        }

        // Phase two: take exclusive storage and install the result.
        {
            let mut pool = self.cache.pool().borrow_mut();
            let token = self.cache.token();
            if pool.branch_available(token, b) && pool.refcount_of(token, b)? > 1 {
                pool.invalidate_one_branch(token, b)?;
            }
            pool.allocate_location(token, b)?;
            let store = pool.branch_cache_mut(token, b)?;
            store.columns = columns;
            store.other_subst = ExtReal::one();
        }
        self.cache.validate_branch(b)
    }

    /// The substitution likelihood, recomputing only stale branches.
    pub fn substitution_likelihood(&mut self) -> Result<ExtReal> {
        if self.cache.cv_valid() {
            return Ok(self.cache.cached_value);
        }

        let root = self.cache.root;
        let incoming = self.tree.branches_in_to(root);
        for &b in &incoming {
            self.ensure_branch(b)?;
        }

        let n_models = self.subst.n_models();
        let n_states = self.subst.n_states();
        let weights = self.subst.weights();

        let mut total = ExtReal::one();
        {
            let pool = self.cache.pool().borrow();
            let token = self.cache.token();
            let root_caches: Vec<&crate::cache::BranchCache> = incoming
                .iter()
                .map(|&b| pool.branch_cache(token, b))
                .collect::<Result<_>>()?;

            for col in 0..self.alignment.n_columns() {
                let mut site = 0.0;
                for m in 0..n_models {
                    let eq = self.subst.equilibrium(m);
                    let mut component = 0.0;
                    for a in 0..n_states {
                        let mut product = self.leaf_factor(root, col, a)?;
                        for rc in &root_caches {
                            product *= rc.columns[col][(m, a)];
                        }
                        component += eq[a] * product;
                    }
                    site += weights[m] * component;
                }
                if site <= 0.0 {
                    total = ExtReal::zero();
                    break;
                }
                total *= ExtReal::from_f64(site);
            }
        }

        self.cache.cached_value = total;
        self.cache.set_cv_valid(true);
        Ok(total)
    }
}

impl Model for DataPartition {
    fn table(&self) -> &ParamTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ParamTable {
        &mut self.table
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    /// The branch mean rescales every branch: all caches go stale.
    fn recalc(&mut self, changed: &[usize]) -> Result<()> {
        if !changed.is_empty() {
            self.cache.invalidate_all()?;
        }
        Ok(())
    }

    /// Exponential prior on the branch mean, times the indel prior on the
    /// alignment.
    fn prior(&self) -> ExtReal {
        let mu_prior = exponential_pdf(self.mu(), 1.0);
        match self.alignment_prior() {
            Ok(align_prior) => mu_prior * align_prior,
            Err(_) => ExtReal::zero(),
        }
    }
}

impl ProbabilityModel for DataPartition {
    fn likelihood(&mut self) -> Result<ExtReal> {
        self.update()?;
        self.substitution_likelihood()
    }
}

/// The aggregate model: every partition's parameters lifted under
/// `name::`, plus the chain temperature.
#[derive(Clone)]
pub struct Parameters {
    table: ParamTable,
    partitions: Vec<DataPartition>,
    /// Lifted parameter index -> (partition, slot).
    users: Vec<(usize, usize)>,
    beta: f64,
}

impl Parameters {
    pub fn new(partitions: Vec<DataPartition>) -> Result<Self> {
        if partitions.is_empty() {
            return Err(PhysaliaError::InvalidInput(
                "at least one partition is required".into(),
            ));
        }
        let mut table = ParamTable::new();
        let mut users = Vec::new();
        for (p, partition) in partitions.iter().enumerate() {
            for (slot, param) in partition.table().iter().enumerate() {
                let mut lifted = param.clone();
                lifted.name = format!("{}::{}", partition.name(), param.name);
                table.add(lifted)?;
                users.push((p, slot));
            }
        }
        Ok(Parameters {
            table,
            partitions,
            users,
            beta: 1.0,
        })
    }

    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition(&self, index: usize) -> Result<&DataPartition> {
        self.partitions
            .get(index)
            .ok_or_else(|| PhysaliaError::index("partition", index, self.partitions.len()))
    }

    pub fn partition_mut(&mut self, index: usize) -> Result<&mut DataPartition> {
        let len = self.partitions.len();
        self.partitions
            .get_mut(index)
            .ok_or_else(|| PhysaliaError::index("partition", index, len))
    }

    pub fn set_beta(&mut self, beta: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&beta) {
            return Err(PhysaliaError::InvalidInput(format!(
                "temperature beta must lie in [0, 1], got {beta}"
            )));
        }
        self.beta = beta;
        Ok(())
    }

    pub fn get_beta(&self) -> f64 {
        self.beta
    }
}

impl Model for Parameters {
    fn table(&self) -> &ParamTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ParamTable {
        &mut self.table
    }

    fn name(&self) -> String {
        "parameters".into()
    }

    fn write_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.table.write(index, value.clone())?;
        let (p, slot) = *self
            .users
            .get(index)
            .ok_or_else(|| PhysaliaError::index("parameter", index, self.users.len()))?;
        self.partitions[p].write_value(slot, value)
    }

    fn update(&mut self) -> Result<()> {
        for partition in &mut self.partitions {
            partition.update()?;
        }
        if self.table.is_valid() {
            return Ok(());
        }
        self.table.validate();
        Ok(())
    }

    fn prior(&self) -> ExtReal {
        self.partitions.iter().map(|p| p.prior()).product()
    }
}

impl ProbabilityModel for Parameters {
    fn likelihood(&mut self) -> Result<ExtReal> {
        self.update()?;
        let mut total = ExtReal::one();
        for partition in &mut self.partitions {
            total *= partition.substitution_likelihood()?;
        }
        Ok(total)
    }

    /// The likelihood raised to the chain temperature.
    fn heated_likelihood(&mut self) -> Result<ExtReal> {
        let beta = self.beta;
        Ok(self.likelihood()?.pow(beta))
    }
}

impl physalia_model::AnnealedModel for Parameters {
    fn set_beta(&mut self, beta: f64) -> Result<()> {
        Parameters::set_beta(self, beta)
    }

    fn get_beta(&self) -> f64 {
        Parameters::get_beta(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indel::GeometricIndel;
    use crate::subst::JukesCantorMixture;

    fn quartet_tree() -> Tree {
        let mut t = Tree::from_edges(6, &[(0, 4), (1, 4), (2, 5), (3, 5), (4, 5)]).unwrap();
        for (b, len) in [(0, 0.1), (2, 0.2), (4, 0.15), (6, 0.12), (8, 0.3)] {
            t.set_branch_length(b, len).unwrap();
        }
        t
    }

    fn named_quartet_partition(name: &str, rates: Vec<f64>) -> DataPartition {
        let subst = Rc::new(JukesCantorMixture::new(4, rates).unwrap());
        let pool = Rc::new(RefCell::new(MultiLikelihoodCache::new(
            subst.n_models(),
            4,
        )));
        let alignment =
            Alignment::from_strings(&["ACGT", "ACGA", "AGGT", "ACCT"], "ACGT").unwrap();
        DataPartition::new(
            name,
            quartet_tree(),
            alignment,
            subst,
            Rc::new(GeometricIndel::new(0.3, 0.4, 0.05).unwrap()),
            pool,
        )
        .unwrap()
    }

    fn quartet_partition(rates: Vec<f64>) -> DataPartition {
        named_quartet_partition("part", rates)
    }

    /// Reference likelihood by enumerating every internal-node letter
    /// assignment per column.
    fn brute_force_likelihood(p: &DataPartition) -> f64 {
        let tree = p.tree();
        let subst = &p.subst;
        let weights = subst.weights();
        let n_states = subst.n_states();
        let root = p.cache().root;

        // Parent branch (pointing parent -> child) for every non-root node.
        let mut parent: Vec<Option<usize>> = vec![None; tree.n_nodes()];
        let mut order = vec![root];
        let mut k = 0;
        while k < order.len() {
            let node = order[k];
            k += 1;
            for b in tree.branches_out_of(node) {
                let child = tree.target(b);
                if parent[child].is_none() && child != root {
                    parent[child] = Some(b);
                    order.push(child);
                }
            }
        }

        let internal: Vec<usize> = (0..tree.n_nodes())
            .filter(|&n| !tree.is_leaf(n))
            .collect();

        let mut total_ln = 0.0;
        for col in 0..p.alignment().n_columns() {
            let mut site = 0.0;
            for m in 0..subst.n_models() {
                let eq = subst.equilibrium(m);
                // Enumerate letters at internal nodes.
                let mut assignment = vec![0usize; internal.len()];
                let mut component = 0.0;
                loop {
                    let letter_at = |node: usize| -> Option<usize> {
                        if tree.is_leaf(node) {
                            p.alignment().entry(col, node).unwrap()
                        } else {
                            let k = internal.iter().position(|&n| n == node).unwrap();
                            Some(assignment[k])
                        }
                    };

                    // Gap-free alignment: every leaf resolved.
                    let mut term = eq[letter_at(root).unwrap()];
                    for node in 0..tree.n_nodes() {
                        if node == root {
                            continue;
                        }
                        let b = parent[node].unwrap();
                        let t = p.effective_length(b);
                        let pm = subst.transition_p(t, m);
                        term *= pm[(
                            letter_at(tree.source(b)).unwrap(),
                            letter_at(node).unwrap(),
                        )];
                    }
                    component += term;

                    // Next assignment.
                    let mut idx = 0;
                    loop {
                        if idx == assignment.len() {
                            break;
                        }
                        assignment[idx] += 1;
                        if assignment[idx] < n_states {
                            break;
                        }
                        assignment[idx] = 0;
                        idx += 1;
                    }
                    if idx == assignment.len() {
                        break;
                    }
                }
                site += weights[m] * component;
            }
            total_ln += site.ln();
        }
        total_ln
    }

    #[test]
    fn peeling_matches_brute_force() {
        let mut p = quartet_partition(vec![1.0]);
        let peeled = p.likelihood().unwrap().ln();
        let brute = brute_force_likelihood(&p);
        assert!(
            (peeled - brute).abs() < 1e-9,
            "peeled {peeled} vs brute force {brute}"
        );
    }

    #[test]
    fn peeling_matches_brute_force_with_rate_mixture() {
        let mut p = quartet_partition(vec![0.3, 1.7]);
        let peeled = p.likelihood().unwrap().ln();
        let brute = brute_force_likelihood(&p);
        assert!(
            (peeled - brute).abs() < 1e-9,
            "peeled {peeled} vs brute force {brute}"
        );
    }

    #[test]
    fn likelihood_is_cached_between_queries() {
        let mut p = quartet_partition(vec![1.0]);
        let first = p.likelihood().unwrap();
        assert!(p.cache().cv_valid());
        let second = p.likelihood().unwrap();
        assert_eq!(first.ln(), second.ln());
    }

    #[test]
    fn mu_change_invalidates_and_changes_the_likelihood() {
        let mut p = quartet_partition(vec![1.0]);
        let before = p.likelihood().unwrap().ln();

        p.set_parameter_value(0, Value::Double(2.0)).unwrap();
        assert!(!p.cache().cv_valid());
        let after = p.likelihood().unwrap().ln();
        assert!((before - after).abs() > 1e-9);

        // And the new value matches a fresh brute force at mu = 2.
        let brute = brute_force_likelihood(&p);
        assert!((after - brute).abs() < 1e-9);
    }

    #[test]
    fn branch_length_change_recomputes_only_dependent_branches() {
        let mut p = quartet_partition(vec![1.0]);
        p.likelihood().unwrap();

        // A leaf edge: 0 -> 4.
        let leaf_edge = p.tree().branches_out_of(0)[0];
        let untouched = p.tree().branches_out_of(1)[0];
        p.set_branch_length(leaf_edge, 0.5).unwrap();

        assert!(!p.cache().up_to_date(leaf_edge));
        // The other leaf's inward conditional is untouched.
        assert!(p.cache().up_to_date(untouched));

        let after = p.likelihood().unwrap().ln();
        let brute = brute_force_likelihood(&p);
        assert!((after - brute).abs() < 1e-9);
    }

    #[test]
    fn snapshot_isolation_through_the_pool() {
        let mut p = quartet_partition(vec![1.0]);
        let before = p.likelihood().unwrap().ln();

        let mut snapshot = p.clone();
        {
            let pool = p.cache().pool().borrow();
            pool.check_invariants().unwrap();
        }

        snapshot.set_parameter_value(0, Value::Double(3.0)).unwrap();
        let changed = snapshot.likelihood().unwrap().ln();
        assert!((changed - before).abs() > 1e-9);

        // The original still answers from its own caches.
        let original = p.likelihood().unwrap().ln();
        assert!((original - before).abs() < 1e-12);
        p.cache().pool().borrow().check_invariants().unwrap();
    }

    #[test]
    fn two_taxon_alignment_prior_scores_the_path() {
        let subst = Rc::new(JukesCantorMixture::uniform(4).unwrap());
        let pool = Rc::new(RefCell::new(MultiLikelihoodCache::new(1, 4)));
        let tree = Tree::from_edges(2, &[(0, 1)]).unwrap();
        let alignment = Alignment::from_strings(&["AC-T", "A-GT"], "ACGT").unwrap();
        let indel = Rc::new(GeometricIndel::new(0.3, 0.4, 0.05).unwrap());
        let p = DataPartition::new("pair", tree, alignment, subst, indel, pool).unwrap();

        let hmm = p.branch_hmm(p.tree().branches_out_of(0)[0]).unwrap();
        // Path M, I, D, M read off the alignment columns.
        let expected = hmm.start[0]
            * hmm.trans[(0, 1)]
            * hmm.trans[(1, 2)]
            * hmm.trans[(2, 0)]
            * hmm.end[0];
        let got = p.alignment_prior().unwrap().to_f64();
        assert!(
            (got - expected).abs() < 1e-15,
            "alignment prior {got} vs {expected}"
        );
    }

    #[test]
    fn parameters_aggregate_products() {
        let p1 = named_quartet_partition("first", vec![1.0]);
        let p2 = named_quartet_partition("second", vec![1.0]);
        let like1 = {
            let mut p = p1.clone();
            p.likelihood().unwrap()
        };

        let mut params = Parameters::new(vec![p1, p2]).unwrap();
        let total = params.likelihood().unwrap();
        assert!((total.ln() - 2.0 * like1.ln()).abs() < 1e-9);

        assert_eq!(
            physalia_model::model::parameter_names(&params),
            vec!["first::mu", "second::mu"]
        );

        // Writes through a lifted parameter reach exactly one child.
        params.set_parameter_value(1, Value::Double(2.0)).unwrap();
        assert_eq!(params.partition(0).unwrap().mu(), 1.0);
        assert_eq!(params.partition(1).unwrap().mu(), 2.0);
    }

    #[test]
    fn heated_likelihood_follows_beta() {
        let p = quartet_partition(vec![1.0]);
        let mut params = Parameters::new(vec![p]).unwrap();
        let cold = params.likelihood().unwrap().ln();

        params.set_beta(0.25).unwrap();
        let heated = params.heated_likelihood().unwrap().ln();
        assert!((heated - 0.25 * cold).abs() < 1e-12);
        assert_eq!(params.get_beta(), 0.25);

        assert!(params.set_beta(1.5).is_err());
    }
}

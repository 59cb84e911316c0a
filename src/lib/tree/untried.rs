use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, WeightedIndex};

/// Candidate actions not yet expanded into children, optionally carrying a sampling weight each.
#[derive(Clone, Debug, PartialEq)]
pub struct UntriedActions<A> {
    actions: Vec<A>,
    weights: Option<Vec<f32>>,
}

impl<A> UntriedActions<A> {
    pub fn empty() -> Self {
        UntriedActions {
            actions: vec![],
            weights: None,
        }
    }

    pub fn uniform(actions: Vec<A>) -> Self {
        UntriedActions {
            actions,
            weights: None,
        }
    }

    pub fn weighted(weighted: Vec<(A, f32)>) -> Self {
        let (actions, weights) = weighted.into_iter().unzip();
        UntriedActions {
            actions,
            weights: Some(weights),
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&A> {
        self.actions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &A> {
        self.actions.iter()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        if let Some(w) = self.weights.as_mut() {
            w.clear();
        }
    }

    pub fn random<R: Rng>(&self, rng: &mut R) -> Option<&A> {
        self.actions.choose(rng)
    }

    /// Samples according to the weights. Falls back to uniform when there are none or they are
    /// all zero.
    pub fn on_distribution<R: Rng>(&self, rng: &mut R) -> Option<&A> {
        match &self.weights {
            Some(weights) => match WeightedIndex::new(weights) {
                Ok(dist) => self.actions.get(dist.sample(rng)),
                Err(_) => self.random(rng),
            },
            None => self.random(rng),
        }
    }
}

impl<A: PartialEq> UntriedActions<A> {
    pub fn contains(&self, action: &A) -> bool {
        self.actions.contains(action)
    }

    pub fn remove(&mut self, action: &A) -> bool {
        match self.actions.iter().position(|a| a == action) {
            Some(i) => {
                self.actions.remove(i);
                if let Some(w) = self.weights.as_mut() {
                    w.remove(i);
                }
                true
            }
            None => false,
        }
    }
}

impl<A: Clone> UntriedActions<A> {
    pub fn to_vec(&self) -> Vec<A> {
        self.actions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn remove_keeps_weights_aligned() {
        let mut untried = UntriedActions::weighted(vec![('a', 0.0), ('b', 1.0), ('c', 0.0)]);
        assert!(untried.remove(&'a'));
        assert!(!untried.remove(&'a'));
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(untried.on_distribution(&mut rng), Some(&'b'));
        }
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let untried = UntriedActions::weighted(vec![(1, 0.0), (2, 0.0)]);
        let mut rng = SmallRng::seed_from_u64(9);
        assert!(untried.on_distribution(&mut rng).is_some());
        let empty = UntriedActions::<u8>::empty();
        assert_eq!(empty.on_distribution(&mut rng), None);
    }
}

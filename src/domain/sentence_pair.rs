// ============================================================
// Layer 3 — Token Pair Domain Type
// ============================================================
// One source/target sentence after tokenisation. The target
// already carries <s> ... </s>; the source carries neither.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub src: Vec<u32>,
    pub trg: Vec<u32>,
}

impl TokenPair {
    pub fn new(src: Vec<u32>, trg: Vec<u32>) -> Self {
        Self { src, trg }
    }

    /// Number of tokens this pair occupies in a token-budget batch:
    /// the longer of the two sides.
    pub fn budget_len(&self) -> usize {
        self.src.len().max(self.trg.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_len_uses_longer_side() {
        let pair = TokenPair::new(vec![5, 6, 7], vec![2, 8, 3]);
        assert_eq!(pair.budget_len(), 3);
        let pair = TokenPair::new(vec![5], vec![2, 8, 9, 3]);
        assert_eq!(pair.budget_len(), 4);
    }
}

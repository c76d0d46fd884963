use ethers::types::{Address, U256};
use models::TokenLedger;

/// 单个代币的复投 / 收获分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAmounts {
    pub compound: U256,
    pub harvest: U256,
}

/// compound = total × pct / 100 (向下取整)，harvest = total - compound
pub fn split_amount(total: U256, compound_pct: u8) -> SplitAmounts {
    let pct = U256::from(compound_pct.min(100));
    let hundred = U256::from(100u64);
    // total = 100q + r，分开计算避免溢出
    let compound = total / hundred * pct + total % hundred * pct / hundred;
    SplitAmounts {
        compound,
        harvest: total - compound,
    }
}

/// 按币种拆分总额，不能复投的币种全部分配给收获
pub fn split_ledger(
    totals: &TokenLedger,
    compound_pct: u8,
    compoundable: impl Fn(Address) -> bool,
) -> (TokenLedger, TokenLedger) {
    let mut compound = TokenLedger::new();
    let mut harvest = TokenLedger::new();
    for entry in totals.iter() {
        let pct = if compoundable(entry.token) { compound_pct } else { 0 };
        let split = split_amount(entry.amount, pct);
        compound.add(entry.token, split.compound);
        harvest.add(entry.token, split.harvest);
    }
    (compound, harvest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_conserves_total_for_every_pct() {
        let totals = [
            U256::zero(),
            U256::one(),
            U256::from(999_999u64),
            U256::from(1_000_000u64),
            U256::exp10(18) + U256::from(7),
            U256::MAX,
        ];
        for total in totals {
            for pct in 0..=100u8 {
                let split = split_amount(total, pct);
                assert_eq!(split.compound + split.harvest, total, "total={} pct={}", total, pct);
                assert!(split.compound <= total);
            }
        }
    }

    #[test]
    fn test_half_split_of_one_unit() {
        // 1.000000 (6 位精度) 按 50% 拆分
        let split = split_amount(U256::from(1_000_000u64), 50);
        assert_eq!(split.compound, U256::from(500_000u64));
        assert_eq!(split.harvest, U256::from(500_000u64));

        assert_eq!(split_amount(U256::from(7), 0).compound, U256::zero());
        assert_eq!(split_amount(U256::from(7), 100).harvest, U256::zero());
    }

    #[test]
    fn test_non_compoundable_tokens_go_to_harvest() {
        let in_pool = Address::repeat_byte(1);
        let outside = Address::repeat_byte(2);
        let mut totals = TokenLedger::new();
        totals.add(in_pool, U256::from(100));
        totals.add(outside, U256::from(40));

        let (compound, harvest) = split_ledger(&totals, 30, |t| t == in_pool);
        assert_eq!(compound.get(in_pool), U256::from(30));
        assert_eq!(harvest.get(in_pool), U256::from(70));
        assert_eq!(compound.get(outside), U256::zero());
        assert_eq!(harvest.get(outside), U256::from(40));
        assert_eq!(compound.merged(&harvest), totals);
    }
}

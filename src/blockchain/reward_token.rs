// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reward token contract interface.

use alloy::sol;

// Minimal ABI of the reward token: per-account vaults plus a minter-only mint.
sol! {
    #[sol(rpc)]
    interface IRewardToken {
        function openVault() external;
        function hasVault(address account) external view returns (bool);
        function mint(address to, uint256 amount) external;
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        primitives::{Address, U256},
        sol_types::SolCall,
    };

    #[test]
    fn mint_call_encodes_selector_and_arguments() {
        let call = IRewardToken::mintCall {
            to: Address::repeat_byte(0x11),
            amount: U256::from(10u64),
        };
        let data = call.abi_encode();
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[..4], &IRewardToken::mintCall::SELECTOR);
    }

    #[test]
    fn open_vault_takes_no_arguments() {
        let data = IRewardToken::openVaultCall {}.abi_encode();
        assert_eq!(data.len(), 4);
    }
}

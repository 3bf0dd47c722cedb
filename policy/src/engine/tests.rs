#[cfg(test)]
mod tests {
    use crate::engine::*;
    use chrono::DateTime;
    use common::{
        signer::LocalDerSigner,
        test_utils::{self, TEST_CHAIN_ID},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };
    use std::time::SystemTime;

    const DAY: u64 = 24 * 3600;
    const START: u64 = 1_700_000_000;
    const OWNER: Address = Address::repeat_byte(0x01);
    const UPDATER: Address = Address::repeat_byte(0x02);
    const FACTORY: Address = Address::repeat_byte(0x03);
    const ALICE: Address = Address::repeat_byte(0x0a);
    const BOB: Address = Address::repeat_byte(0x0b);
    const CAROL: Address = Address::repeat_byte(0x0c);
    const NFT: Address = Address::repeat_byte(0x77);
    const GWEI: u128 = 1_000_000_000;
    const ETHER: u64 = 1_000_000_000_000_000_000;

    #[derive(Clone, Default)]
    pub struct MockClock {
        pub timestamp: Arc<AtomicU64>,
    }
    impl MockClock {
        fn advance(&self, seconds: u64) {
            self.timestamp.fetch_add(seconds, Ordering::SeqCst);
        }
    }
    impl Clock for MockClock {
        fn now(&self) -> SystemTime {
            let timestamp = self.timestamp.load(Ordering::SeqCst);
            SystemTime::from(DateTime::from_timestamp(timestamp.try_into().unwrap(), 0).unwrap())
        }
    }

    struct Setup {
        engine: PolicyEngine<MockClock, LocalDerSigner>,
        clock: MockClock,
        /// Signer-held wallet owned by ALICE that holds the NFT at start.
        holder: Address,
    }

    fn setup() -> Setup {
        let clock = MockClock {
            timestamp: Arc::new(AtomicU64::new(START)),
        };
        let mut signer = LocalDerSigner::new(B256::repeat_byte(0x5e));
        let holder = signer.create_account().unwrap();
        let config = EngineConfig {
            owner: OWNER,
            updater: Some(UPDATER),
            auction: AuctionConfig {
                nft_contract: NFT,
                token_id: U256::from(1),
                target_chain_id: TEST_CHAIN_ID,
                min_ownership_time: 60,
                min_encumbrance_time_left: 14 * DAY,
            },
            initial_owner: holder,
            initial_encumbrance_time: 28 * DAY,
        };
        let mut engine = PolicyEngine::new(config, clock.clone(), signer).unwrap();
        engine.set_trusted_factory(OWNER, FACTORY).unwrap();
        engine
            .enter_encumbrance(FACTORY, holder, ALICE, START + 28 * DAY)
            .unwrap();
        Setup {
            engine,
            clock,
            holder,
        }
    }

    /// Puts `encoded` alone in block `number`, publishes its hash and
    /// returns the proof.
    fn include(
        engine: &mut PolicyEngine<MockClock, LocalDerSigner>,
        number: u64,
        encoded: Vec<u8>,
    ) -> common::proof::AssembledProof {
        let block = test_utils::build_block(number, vec![encoded]).unwrap();
        engine
            .set_block_hash(UPDATER, number, block.hash())
            .unwrap();
        block.prove(0).unwrap()
    }

    fn fund(engine: &mut PolicyEngine<MockClock, LocalDerSigner>, wallet: Address, number: u64) {
        let key = test_utils::signing_key(0x44).unwrap();
        let deposit = test_utils::sign(test_utils::transfer(number, wallet, ETHER), &key).unwrap();
        let assembled = include(engine, number, deposit.encoded().unwrap());
        engine
            .deposit_funds(&assembled.transaction, &assembled.proof, number)
            .unwrap();
    }

    #[test]
    fn test_deposit_is_proof_gated_and_credited_once() {
        let Setup {
            mut engine, holder, ..
        } = setup();
        let key = test_utils::signing_key(0x44).unwrap();
        let deposit = test_utils::sign(test_utils::transfer(0, holder, ETHER), &key).unwrap();
        let block = test_utils::build_block(10, vec![deposit.encoded().unwrap()]).unwrap();
        let assembled = block.prove(0).unwrap();

        assert_eq!(
            engine.deposit_funds(&assembled.transaction, &assembled.proof, 10),
            Err(PolicyError::BlockHashNotSet(10))
        );
        engine.set_block_hash(UPDATER, 10, block.hash()).unwrap();
        assert_eq!(
            engine
                .deposit_funds(&assembled.transaction, &assembled.proof, 10)
                .unwrap(),
            U256::from(ETHER)
        );
        assert!(matches!(
            engine.deposit_funds(&assembled.transaction, &assembled.proof, 10),
            Err(PolicyError::DepositAlreadyCredited(_))
        ));
        assert_eq!(engine.eth_balance(holder, TEST_CHAIN_ID), U256::from(ETHER));
        assert!(engine.events().iter().any(|event| matches!(
            event,
            PolicyEvent::DepositCredited { wallet, .. } if *wallet == holder
        )));
    }

    #[test]
    fn test_sign_transaction_checks_owner_nonce_and_destination() {
        let Setup {
            mut engine, holder, ..
        } = setup();
        fund(&mut engine, holder, 10);

        let tx = test_utils::transfer(0, Address::repeat_byte(0x99), 1_000);
        assert_eq!(
            engine.sign_transaction(BOB, holder, tx.clone()),
            Err(PolicyError::NotWalletOwner {
                wallet: holder,
                caller: BOB
            })
        );
        let to_nft = Type2Transaction {
            destination: NFT,
            ..tx.clone()
        };
        assert_eq!(
            engine.sign_transaction(ALICE, holder, to_nft),
            Err(PolicyError::RestrictedDestination(NFT))
        );
        let other_chain = Type2Transaction {
            chain_id: 1,
            ..tx.clone()
        };
        assert!(matches!(
            engine.sign_transaction(ALICE, holder, other_chain),
            Err(PolicyError::WrongChain { .. })
        ));

        let signed = engine.sign_transaction(ALICE, holder, tx).unwrap();
        assert_eq!(signed.transaction.recover_signer().unwrap(), holder);
        assert_eq!(signed.der_signature[0], 0x30);
        assert_eq!(signed.transaction_hash, signed.transaction.hash().unwrap());

        let proof = include(&mut engine, 11, signed.encoded.to_vec());
        let accepted = engine
            .prove_transaction_inclusion(&signed.transaction, &proof.proof, 11)
            .unwrap();
        assert_eq!(accepted.sender, holder);
        assert_eq!(accepted.transaction_index, 0);
        assert_eq!(engine.next_nonce(holder), 1);

        let stale = test_utils::transfer(0, Address::repeat_byte(0x99), 1);
        assert!(matches!(
            engine.sign_transaction(ALICE, holder, stale),
            Err(PolicyError::NonceMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn test_inclusion_from_unknown_sender_is_rejected() {
        let Setup { mut engine, .. } = setup();
        let key = test_utils::signing_key(0x45).unwrap();
        let outsider = test_utils::sign(test_utils::transfer(0, BOB, 1), &key).unwrap();
        let proof = include(&mut engine, 12, outsider.encoded().unwrap());
        assert_eq!(
            engine.prove_transaction_inclusion(&outsider, &proof.proof, 12),
            Err(PolicyError::UnknownWallet(test_utils::address(&key)))
        );
    }

    #[test]
    fn test_auction_handover_with_transfer_proof() {
        let Setup {
            mut engine,
            clock,
            holder,
        } = setup();
        fund(&mut engine, holder, 10);

        let bob_wallet = engine.create_wallet(BOB).unwrap().address;
        let carol_wallet = engine.create_wallet(CAROL).unwrap().address;
        engine
            .place_bid(BOB, bob_wallet, U256::from(10), U256::from(10))
            .unwrap();
        engine
            .place_bid(CAROL, carol_wallet, U256::from(8), U256::from(8))
            .unwrap();
        assert!(matches!(
            engine.place_bid(CAROL, bob_wallet, U256::from(11), U256::from(1)),
            Err(PolicyError::NotWalletOwner { .. })
        ));
        assert!(matches!(
            engine.finalize_auction(),
            Err(PolicyError::AuctionNotYetFinalizable { .. })
        ));
        assert_eq!(
            engine.sign_nft_transfer_transaction(20 * GWEI),
            Err(PolicyError::NoPendingTransfer)
        );

        clock.advance(60);
        let outcome = engine.finalize_auction().unwrap();
        assert_eq!(outcome.winner, Some(bob_wallet));
        assert_eq!(outcome.price, U256::from(8));
        assert_eq!(engine.current_owner(), bob_wallet);
        assert_eq!(engine.previous_owner(), holder);
        assert_eq!(engine.next_auction_end(), START + 120);
        assert_eq!(engine.bid_balance(bob_wallet), U256::from(2));
        assert_eq!(
            engine.withdraw_bid_balance(CAROL, carol_wallet).unwrap(),
            U256::from(8)
        );
        assert_eq!(
            engine.withdraw_bid_balance(CAROL, carol_wallet).unwrap(),
            U256::ZERO
        );

        let transfer = engine.sign_nft_transfer_transaction(20 * GWEI).unwrap();
        assert_eq!(transfer.transaction.transaction.destination, NFT);
        assert_eq!(transfer.transaction.recover_signer().unwrap(), holder);
        assert!(engine.auction().escrowed_transfer().is_some());

        let proof = include(&mut engine, 20, transfer.encoded.to_vec());
        let claim = TransferClaim {
            claimed_nonce: 0,
            new_owner: bob_wallet,
            tx_nonce: 0,
            max_fee_per_gas: 20 * GWEI,
        };
        assert!(matches!(
            engine.prove_previous_transfer(&transfer.transaction, None, claim),
            Err(PolicyError::Proof(_))
        ));
        let wrong_owner = TransferClaim {
            new_owner: carol_wallet,
            ..claim
        };
        assert!(matches!(
            engine.prove_previous_transfer(&transfer.transaction, Some((&proof.proof, 20)), wrong_owner),
            Err(PolicyError::UnexpectedTransfer(_))
        ));
        assert_eq!(engine.next_nonce(holder), 0);

        engine
            .prove_previous_transfer(&transfer.transaction, Some((&proof.proof, 20)), claim)
            .unwrap();
        assert_eq!(engine.previous_owner(), bob_wallet);
        assert_eq!(engine.next_nonce(holder), 1);
        assert!(engine.auction().escrowed_transfer().is_none());
        assert_eq!(
            engine.eth_balance(holder, TEST_CHAIN_ID),
            U256::from(ETHER) - U256::from(100_000u128 * 20 * GWEI)
        );
        assert_eq!(
            engine.sign_nft_transfer_transaction(20 * GWEI),
            Err(PolicyError::NoPendingTransfer)
        );
    }

    #[test]
    fn test_previous_transfer_reuses_accepted_inclusion() {
        let Setup {
            mut engine,
            clock,
            holder,
        } = setup();
        fund(&mut engine, holder, 10);
        let bob_wallet = engine.create_wallet(BOB).unwrap().address;
        engine
            .place_bid(BOB, bob_wallet, U256::from(1), U256::from(1))
            .unwrap();
        clock.advance(61);
        engine.finalize_auction().unwrap();

        let transfer = engine.sign_nft_transfer_transaction(30 * GWEI).unwrap();
        let proof = include(&mut engine, 21, transfer.encoded.to_vec());
        engine
            .prove_transaction_inclusion(&transfer.transaction, &proof.proof, 21)
            .unwrap();
        engine
            .prove_previous_transfer(
                &transfer.transaction,
                None,
                TransferClaim {
                    claimed_nonce: 0,
                    new_owner: bob_wallet,
                    tx_nonce: 0,
                    max_fee_per_gas: 30 * GWEI,
                },
            )
            .unwrap();
        assert_eq!(engine.previous_owner(), bob_wallet);
        assert_eq!(engine.next_nonce(holder), 1);
    }

    #[test]
    fn test_bid_needs_encumbrance_time() {
        let Setup {
            mut engine, clock, ..
        } = setup();
        let wallet = engine.create_wallet(BOB).unwrap().address;
        clock.advance(14 * DAY);
        engine
            .place_bid(BOB, wallet, U256::from(1), U256::from(1))
            .unwrap();
        clock.advance(1);
        assert!(matches!(
            engine.place_bid(BOB, wallet, U256::from(1), U256::ZERO),
            Err(PolicyError::NotEnoughEncumbranceTimeLeft { .. })
        ));
    }

    #[test]
    fn test_admin_operations_require_owner() {
        let Setup {
            mut engine, holder, ..
        } = setup();
        assert!(engine.set_previous_proven_owner(ALICE, BOB).is_err());
        assert!(engine.update_whitelist(ALICE, &[holder], true).is_err());
        assert!(matches!(
            engine.enter_encumbrance(ALICE, holder, ALICE, START),
            Err(PolicyError::UntrustedFactory(ALICE))
        ));
        assert!(matches!(
            engine.enter_encumbrance(FACTORY, BOB, ALICE, START),
            Err(PolicyError::Signer(_))
        ));

        engine.transfer_ownership(OWNER, ALICE).unwrap();
        engine.accept_ownership(ALICE).unwrap();
        engine.set_previous_proven_owner(ALICE, BOB).unwrap();
        assert_eq!(engine.previous_owner(), BOB);
        assert_eq!(engine.admin().owner(), ALICE);
    }

    #[test]
    fn test_batch_block_hashes_and_oracle_ownership() {
        let Setup { mut engine, .. } = setup();
        let batch = [(5, B256::repeat_byte(0x05)), (6, B256::repeat_byte(0x06))];
        assert_eq!(engine.set_multiple_block_hashes(UPDATER, &batch).unwrap(), 2);
        assert_eq!(engine.set_multiple_block_hashes(UPDATER, &batch).unwrap(), 0);
        let hashes_set = engine
            .events()
            .iter()
            .filter(|event| matches!(event, PolicyEvent::BlockHashSet { .. }))
            .count();
        assert_eq!(hashes_set, 2);
        assert_eq!(engine.get_block_hash(6), B256::repeat_byte(0x06));

        engine.transfer_oracle_ownership(OWNER, BOB).unwrap();
        engine.accept_oracle_ownership(BOB).unwrap();
        assert!(engine.grant_updater(BOB, CAROL).unwrap());
        assert!(
            engine
                .set_block_hash(CAROL, 7, B256::repeat_byte(0x07))
                .unwrap()
        );
        assert!(engine.revoke_updater(BOB, UPDATER).unwrap());
        assert!(engine.set_block_hash(UPDATER, 8, B256::repeat_byte(0x08)).is_err());
    }

    #[test]
    fn test_current_owner_message_and_local_funds() {
        let Setup {
            mut engine, holder, ..
        } = setup();
        assert!(
            engine
                .send_current_owner_message(BOB, NFT, Bytes::from_static(b"hi"))
                .is_err()
        );
        let start = engine.events().len();
        engine
            .send_current_owner_message(ALICE, NFT, Bytes::from_static(b"hi"))
            .unwrap();
        assert!(matches!(
            engine.events_since(start),
            [PolicyEvent::CurrentOwnerMessage { owner, .. }] if *owner == holder
        ));

        engine
            .deposit_local_funds(OWNER, holder, TEST_CHAIN_ID, U256::from(3))
            .unwrap();
        assert_eq!(engine.local_balance(holder, TEST_CHAIN_ID), U256::from(3));
        assert!(
            engine
                .deposit_local_funds(OWNER, BOB, TEST_CHAIN_ID, U256::from(3))
                .is_err()
        );
    }

    #[test]
    fn test_local_deposit_requires_policy_owner() {
        let Setup {
            mut engine, holder, ..
        } = setup();
        assert_eq!(
            engine.deposit_local_funds(ALICE, holder, TEST_CHAIN_ID, U256::from(3)),
            Err(PolicyError::Unauthorized {
                caller: ALICE,
                role: Role::Owner,
            })
        );
        assert_eq!(engine.local_balance(holder, TEST_CHAIN_ID), U256::ZERO);
    }

    #[test]
    fn test_bid_funded_from_local_balance() {
        let Setup {
            mut engine, clock, ..
        } = setup();
        let bob_wallet = engine.create_wallet(BOB).unwrap().address;
        let carol_wallet = engine.create_wallet(CAROL).unwrap().address;
        engine
            .deposit_local_funds(OWNER, bob_wallet, TEST_CHAIN_ID, U256::from(10))
            .unwrap();
        engine
            .deposit_local_funds(OWNER, carol_wallet, TEST_CHAIN_ID, U256::from(4))
            .unwrap();

        assert_eq!(
            engine.place_bid_from_local_balance(CAROL, carol_wallet, U256::from(5)),
            Err(PolicyError::InsufficientBalance {
                required: U256::from(5),
                available: U256::from(4),
            })
        );
        assert_eq!(engine.bid_balance(carol_wallet), U256::ZERO);
        assert!(matches!(
            engine.place_bid_from_local_balance(CAROL, bob_wallet, U256::from(1)),
            Err(PolicyError::NotWalletOwner { .. })
        ));

        engine
            .place_bid_from_local_balance(BOB, bob_wallet, U256::from(6))
            .unwrap();
        // raising the bid only draws the difference
        engine
            .place_bid_from_local_balance(BOB, bob_wallet, U256::from(9))
            .unwrap();
        assert_eq!(engine.bid_balance(bob_wallet), U256::from(9));
        assert_eq!(engine.local_balance(bob_wallet, TEST_CHAIN_ID), U256::from(1));
        engine
            .place_bid_from_local_balance(CAROL, carol_wallet, U256::from(4))
            .unwrap();

        clock.advance(60);
        let outcome = engine.finalize_auction().unwrap();
        assert_eq!(outcome.winner, Some(bob_wallet));
        assert_eq!(outcome.price, U256::from(4));

        assert_eq!(
            engine
                .withdraw_bid_balance_to_local(BOB, bob_wallet)
                .unwrap(),
            U256::from(5)
        );
        assert_eq!(engine.local_balance(bob_wallet, TEST_CHAIN_ID), U256::from(6));
        assert_eq!(
            engine
                .withdraw_bid_balance_to_local(CAROL, carol_wallet)
                .unwrap(),
            U256::from(4)
        );
        assert_eq!(engine.local_balance(carol_wallet, TEST_CHAIN_ID), U256::from(4));
    }
}

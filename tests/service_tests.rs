mod common;

use common::{easy_config, extend, keypair, mine};
use emberchain::config::MempoolConfig;
use emberchain::consensus::{Blockchain, PushResult};
use emberchain::core::Transaction;
use emberchain::service::{ChainEvent, ChainService, MempoolEvent};

fn service() -> ChainService {
    let blockchain = Blockchain::volatile(easy_config()).unwrap();
    ChainService::new(blockchain, MempoolConfig::default()).unwrap()
}

#[tokio::test]
async fn test_head_change_notifies_and_revalidates() {
    let service = service();
    let mut mirror = Blockchain::volatile(easy_config()).unwrap();
    let mut chain_events = service.subscribe_chain();
    let mut mempool_events = service.subscribe_mempool();
    let alice = keypair(1);
    let bob = keypair(2);
    let carol = keypair(3);

    let funding = extend(&mut mirror, alice.address(), Vec::new(), 10);
    assert_eq!(service.push_block(funding.clone()).await.unwrap(), PushResult::Ok);
    assert_eq!(chain_events.try_recv().unwrap(), ChainEvent::HeadChanged(funding.clone()));
    assert_eq!(chain_events.try_recv().unwrap(), ChainEvent::Ready);
    assert_eq!(mempool_events.try_recv().unwrap(), MempoolEvent::TransactionsReady);
    assert_eq!(service.height(), 2);
    assert_eq!(service.head_hash(), funding.hash());

    let pending = Transaction::signed(&alice, bob.address(), 100, 0, 0).unwrap();
    service.push_transaction(pending.clone()).await.unwrap();
    assert_eq!(service.get_pending_transaction(&pending.hash()), Some(pending.clone()));
    assert_eq!(service.pending_transactions(), 1);
    assert_eq!(
        mempool_events.try_recv().unwrap(),
        MempoolEvent::TransactionAdded(pending.clone())
    );

    // A different transaction spends the nonce of the pending one
    let spend = Transaction::signed(&alice, carol.address(), 900, 0, 0).unwrap();
    let block = extend(&mut mirror, carol.address(), vec![spend], 20);
    assert_eq!(service.push_block(block.clone()).await.unwrap(), PushResult::Ok);

    assert!(!service.has_pending_transaction(&pending.hash()));
    assert_eq!(mempool_events.try_recv().unwrap(), MempoolEvent::TransactionsReady);
    assert_eq!(chain_events.try_recv().unwrap(), ChainEvent::HeadChanged(block.clone()));
    assert_eq!(chain_events.try_recv().unwrap(), ChainEvent::Ready);
    assert_eq!(service.watch_head().borrow().height, 3);

    // Known blocks only signal readiness
    assert_eq!(service.push_block(block).await.unwrap(), PushResult::KnownBlock);
    assert_eq!(chain_events.try_recv().unwrap(), ChainEvent::Ready);
    assert!(chain_events.try_recv().is_err());
}

#[tokio::test]
async fn test_mine_from_mempool() {
    let service = service();
    let mut mirror = Blockchain::volatile(easy_config()).unwrap();
    let alice = keypair(1);
    let bob = keypair(2);

    let funding = extend(&mut mirror, alice.address(), Vec::new(), 10);
    service.push_block(funding).await.unwrap();

    let tx = Transaction::signed(&alice, bob.address(), 250, 10, 0).unwrap();
    service.push_transaction(tx.clone()).await.unwrap();
    assert!(service.push_transaction(tx.clone()).await.is_err());

    let template = service.create_block_template(bob.address(), None).await.unwrap();
    assert_eq!(template.transactions(), &[tx.clone()]);
    assert_eq!(template.n_bits(), service.get_next_compact_target().await.unwrap());

    let block = mine(template);
    assert_eq!(service.push_block(block.clone()).await.unwrap(), PushResult::Ok);
    assert_eq!(service.accounts_hash().await.unwrap(), *block.accounts_hash());
    assert_eq!(service.get_block(block.hash()).await.unwrap(), Some(block.clone()));
    assert_eq!(service.path().await.unwrap().last(), Some(&block.hash()));

    // The included transaction is stale now
    assert_eq!(service.pending_transactions(), 0);
}

//! Helper patterns shared by the `ISocket` implementations.

pub(crate) mod distributor;
pub(crate) mod fair_queue;
pub(crate) mod load_balancer;
pub(crate) mod orchestrator;
pub(crate) mod router_map;
pub(crate) mod trie;

pub(crate) use distributor::distribute_to_pipes;
pub(crate) use fair_queue::FairQueue;
pub(crate) use load_balancer::LoadBalancer;
pub(crate) use orchestrator::IncomingMessageOrchestrator;
pub(crate) use router_map::RouterMap;
pub(crate) use trie::SubscriptionTrie;

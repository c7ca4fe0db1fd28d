//! 接收者tag
//!
//! tag是频道受众的一次快照，按负责投递的节点分片。tag由频道leader构建，
//! 非leader节点只缓存自己分片的那一份。

use std::sync::Arc;

use dashmap::DashMap;

/// 一个节点负责投递的用户分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUsers {
    pub node_id: u64,
    pub uids: Vec<String>,
}

/// 接收者tag：每个接收者uid恰好出现在一个分片里
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverTag {
    pub key: String,
    pub users: Vec<NodeUsers>,
}

impl ReceiverTag {
    /// 指定节点负责的uid集合，分片缺失时返回空
    pub fn uids_of_node(&self, node_id: u64) -> Vec<String> {
        self.users
            .iter()
            .find(|nu| nu.node_id == node_id)
            .map(|nu| nu.uids.clone())
            .unwrap_or_default()
    }
}

/// tag缓存接口。条目一经写入即视为不可变，失效由频道子系统负责替换。
pub trait TagManager: Send + Sync {
    fn get_receiver_tag(&self, tag_key: &str) -> Option<Arc<ReceiverTag>>;

    fn add_or_update_receiver_tag(&self, tag_key: &str, users: Vec<NodeUsers>) -> Arc<ReceiverTag>;

    fn remove_receiver_tag(&self, tag_key: &str);
}

/// 进程内tag缓存
#[derive(Default)]
pub struct MemoryTagManager {
    tags: DashMap<String, Arc<ReceiverTag>>,
}

impl MemoryTagManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagManager for MemoryTagManager {
    fn get_receiver_tag(&self, tag_key: &str) -> Option<Arc<ReceiverTag>> {
        self.tags.get(tag_key).map(|entry| entry.value().clone())
    }

    fn add_or_update_receiver_tag(&self, tag_key: &str, users: Vec<NodeUsers>) -> Arc<ReceiverTag> {
        let tag = Arc::new(ReceiverTag {
            key: tag_key.to_string(),
            users,
        });
        self.tags.insert(tag_key.to_string(), tag.clone());
        tag
    }

    fn remove_receiver_tag(&self, tag_key: &str) {
        self.tags.remove(tag_key);
    }
}

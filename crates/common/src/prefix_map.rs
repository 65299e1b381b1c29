use std::net::IpAddr;

use ipnet::IpNet;

/// A binary prefix trie mapping CIDR networks to values.
///
/// Separate roots are kept for IPv4 (32-bit) and IPv6 (128-bit) addresses.
/// Lookups return the value of the longest matching prefix.
pub struct IpPrefixMap<V> {
    root_v4: Node<V>,
    root_v6: Node<V>,
    len: usize,
}

struct Node<V> {
    children: [Option<Box<Node<V>>>; 2],
    value: Option<V>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            children: [None, None],
            value: None,
        }
    }
}

/// Bit `index` of the address, counting from the most significant bit.
fn bit_at(addr: &IpAddr, index: usize) -> usize {
    match addr {
        IpAddr::V4(v4) => ((u32::from(*v4) >> (31 - index)) & 1) as usize,
        IpAddr::V6(v6) => ((u128::from(*v6) >> (127 - index)) & 1) as usize,
    }
}

fn bit_len(addr: &IpAddr) -> usize {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl<V> IpPrefixMap<V> {
    pub fn new() -> Self {
        Self {
            root_v4: Node::new(),
            root_v6: Node::new(),
            len: 0,
        }
    }

    /// Insert a network. Re-inserting the same network replaces its value.
    pub fn insert(&mut self, network: IpNet, value: V) {
        let addr = network.network();
        let prefix_len = network.prefix_len() as usize;

        let mut current = match addr {
            IpAddr::V4(_) => &mut self.root_v4,
            IpAddr::V6(_) => &mut self.root_v6,
        };

        for i in 0..prefix_len {
            let idx = bit_at(&addr, i);
            current = current.children[idx].get_or_insert_with(|| Box::new(Node::new()));
        }

        if current.value.replace(value).is_none() {
            self.len += 1;
        }
    }

    /// Value of the longest prefix containing `addr`.
    pub fn get(&self, addr: IpAddr) -> Option<&V> {
        let mut current = match addr {
            IpAddr::V4(_) => &self.root_v4,
            IpAddr::V6(_) => &self.root_v6,
        };
        let mut best = current.value.as_ref();

        for i in 0..bit_len(&addr) {
            match &current.children[bit_at(&addr, i)] {
                Some(node) => {
                    current = node;
                    if current.value.is_some() {
                        best = current.value.as_ref();
                    }
                }
                None => break,
            }
        }

        best
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.get(addr).is_some()
    }

    /// Number of inserted networks across both address families.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<V> Default for IpPrefixMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(IpNet, V)> for IpPrefixMap<V> {
    fn from_iter<I: IntoIterator<Item = (IpNet, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (net, value) in iter {
            map.insert(net, value);
        }
        map
    }
}

use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// A node is written in place at the memory location it describes, the
/// list never allocates nodes itself.
#[repr(C)]
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Intrusive doubly linked list kept in ascending address order.
///
/// Nodes live wherever the caller put them, so ordering by the node address
/// is the same as ordering by the memory the node describes.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

impl<T> Node<T> {
    pub const fn new(data: T) -> Self {
        Self { next: None, prev: None, data }
    }
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    #[inline]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tells whether `node` is currently linked in this list. A detached node
    /// always has both links cleared, so this only looks at `node` itself.
    ///
    /// **SAFETY**: `node` must point to an initialized [`Node`].
    pub unsafe fn contains(&self, node: NonNull<Node<T>>) -> bool {
        unsafe { node.as_ref().prev.is_some() || self.head == Some(node) }
    }

    /// Links `node` right before the first member with a greater address,
    /// or at the end if there is none.
    ///
    /// **SAFETY**: `node` must point to an initialized node that is not a
    /// member of any list, and must stay valid while linked.
    pub unsafe fn insert(&mut self, mut node: NonNull<Node<T>>) {
        let mut prev: Link<Node<T>> = None;
        let mut current = self.head;

        unsafe {
            while let Some(member) = current {
                if member > node {
                    break;
                }
                prev = Some(member);
                current = member.as_ref().next;
            }

            node.as_mut().prev = prev;
            node.as_mut().next = current;

            match prev {
                Some(mut prev) => prev.as_mut().next = Some(node),
                None => self.head = Some(node),
            }

            if let Some(mut next) = current {
                next.as_mut().prev = Some(node);
            }
        }

        self.len += 1;
    }

    /// Detaches `node` from the list, relinking its neighbours and clearing
    /// both of its links. Removing a node that is not linked does nothing.
    ///
    /// **SAFETY**: `node` must point to an initialized node that is either a
    /// member of this list or detached.
    pub unsafe fn remove(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            if !self.contains(node) {
                return;
            }

            let next = node.as_ref().next;
            let prev = node.as_ref().prev;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            if let Some(mut next) = next {
                next.as_mut().prev = prev;
            }

            node.as_mut().next = None;
            node.as_mut().prev = None;
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }
        self.remaining -= 1;

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = NonNull<Node<T>>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(values: &[u32]) -> Box<[Node<u32>]> {
        values.iter().map(|value| Node::new(*value)).collect()
    }

    fn node_at(nodes: &mut [Node<u32>], index: usize) -> NonNull<Node<u32>> {
        NonNull::from(&mut nodes[index])
    }

    fn collect(list: &List<u32>) -> Vec<u32> {
        list.iter().map(|node| unsafe { node.as_ref().data }).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list: List<u32> = List::new();

        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn insert_keeps_address_order() {
        let mut storage = nodes(&[0, 1, 2, 3, 4]);
        let mut list = List::new();

        unsafe {
            for index in [3, 0, 4, 2, 1] {
                list.insert(node_at(&mut storage, index));
            }
        }

        assert_eq!(collect(&list), vec![0, 1, 2, 3, 4]);
        assert_eq!(list.len(), 5);
        assert_eq!(list.first(), Some(node_at(&mut storage, 0)));
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut storage = nodes(&[0, 1, 2]);
        let mut list = List::new();

        unsafe {
            for index in 0..3 {
                list.insert(node_at(&mut storage, index));
            }

            list.remove(node_at(&mut storage, 1));
            assert_eq!(collect(&list), vec![0, 2]);

            list.remove(node_at(&mut storage, 0));
            assert_eq!(collect(&list), vec![2]);
            assert_eq!(list.first(), Some(node_at(&mut storage, 2)));
            assert!(storage[2].prev.is_none());
        }
    }

    #[test]
    fn remove_is_idempotent() {
        let mut storage = nodes(&[0, 1]);
        let mut list = List::new();

        unsafe {
            list.insert(node_at(&mut storage, 0));
            list.insert(node_at(&mut storage, 1));

            let node = node_at(&mut storage, 1);
            list.remove(node);
            list.remove(node);

            assert!(!list.contains(node));
            assert!(storage[1].next.is_none() && storage[1].prev.is_none());
        }

        assert_eq!(list.len(), 1);
        assert_eq!(collect(&list), vec![0]);
    }
}

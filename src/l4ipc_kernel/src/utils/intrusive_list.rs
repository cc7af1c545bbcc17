//! Index-based circular doubly linked lists
//!
//! The elements live in a pool implementing `ops::Index`, and every element
//! embeds the link cell of each list it may belong to. A list is nothing more
//! than a head cell. All cells are accessed through a key; in the kernel, the
//! key is the CPU Lock token.
//!
//! Elements are addressed by index, so an element that is still linked when
//! its owner goes away leaves a stale index behind, never a dangling pointer.
//! Linking an element twice, unlinking an element that isn't linked, and a
//! broken link structure are all kernel bugs and cause a panic.
use core::{fmt, ops};

/// The head of a circular list.
#[derive(Copy, Clone)]
pub struct ListHead<Index> {
    pub first: Option<Index>,
}

impl<Index> Default for ListHead<Index> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Index: fmt::Debug> fmt::Debug for ListHead<Index> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?})", &self.first)
    }
}

impl<Index> ListHead<Index> {
    pub const fn new() -> Self {
        Self { first: None }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Links to neighbor elements. The only element of a list links to itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link<Index> {
    pub prev: Index,
    pub next: Index,
}

/// A cell whose contents are accessed with a key.
pub trait CellLike<Key> {
    type Target;

    fn get(&self, key: &Key) -> Self::Target;
    fn set(&self, key: &mut Key, value: Self::Target);

    #[inline]
    fn modify<T>(&self, key: &mut Key, f: impl FnOnce(&mut Self::Target) -> T) -> T
    where
        Self: Sized,
    {
        let mut x = self.get(key);
        let ret = f(&mut x);
        self.set(key, x);
        ret
    }
}

impl<Element: Copy> CellLike<()> for core::cell::Cell<Element> {
    type Target = Element;

    fn get(&self, _: &()) -> Self::Target {
        self.get()
    }
    fn set(&self, _: &mut (), value: Self::Target) {
        self.set(value);
    }
}

impl<Key, Element: CellLike<Key>> CellLike<Key> for &Element {
    type Target = Element::Target;

    fn get(&self, key: &Key) -> Self::Target {
        (*self).get(key)
    }
    fn set(&self, key: &mut Key, value: Self::Target) {
        (*self).set(key, value);
    }
    fn modify<T>(&self, key: &mut Key, f: impl FnOnce(&mut Self::Target) -> T) -> T {
        (*self).modify(key, f)
    }
}

#[cold]
#[track_caller]
fn inconsistent() -> ! {
    panic!("linked list is inconsistent")
}

/// Accessor to one list: its head cell, the element pool, the projection
/// from an element to its link cell, and the key for all of these cells.
pub struct ListAccessor<'a, HeadCell, Pool: ?Sized, MapLink, CellKey> {
    head: HeadCell,
    pool: &'a Pool,
    map_link: MapLink,
    cell_key: CellKey,
}

impl<'a, HeadCell, Index, Pool, MapLink, Element, LinkCell, CellKey>
    ListAccessor<'a, HeadCell, Pool, MapLink, CellKey>
where
    HeadCell: CellLike<CellKey, Target = ListHead<Index>>,
    Pool: ops::Index<Index, Output = Element> + ?Sized,
    MapLink: Fn(&Element) -> &LinkCell,
    LinkCell: CellLike<CellKey, Target = Option<Link<Index>>>,
    Index: PartialEq + Copy,
{
    pub fn new(head: HeadCell, pool: &'a Pool, map_link: MapLink, cell_key: CellKey) -> Self {
        Self {
            head,
            pool,
            map_link,
            cell_key,
        }
    }

    pub fn pool(&self) -> &'a Pool {
        self.pool
    }

    pub fn cell_key(&self) -> &CellKey {
        &self.cell_key
    }

    fn first(&self) -> Option<Index> {
        self.head.get(&self.cell_key).first
    }

    fn set_first(&mut self, first: Option<Index>) {
        self.head.set(&mut self.cell_key, ListHead { first });
    }

    fn link(&self, item: Index) -> Option<Link<Index>> {
        (self.map_link)(&self.pool[item]).get(&self.cell_key)
    }

    #[track_caller]
    fn linked(&self, item: Index) -> Link<Index> {
        match self.link(item) {
            Some(link) => link,
            None => panic!("list item is not linked"),
        }
    }

    fn set_link(&mut self, item: Index, link: Option<Link<Index>>) {
        (self.map_link)(&self.pool[item]).set(&mut self.cell_key, link);
    }

    /// Update the link of `item`, which must be linked.
    fn update_link(&mut self, item: Index, f: impl FnOnce(&mut Link<Index>)) {
        (self.map_link)(&self.pool[item]).modify(&mut self.cell_key, |link| match link {
            Some(link) => f(link),
            None => inconsistent(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    #[inline]
    pub fn front(&self) -> Option<Index> {
        self.first()
    }

    #[inline]
    pub fn back(&self) -> Option<Index> {
        let first = self.first()?;
        match self.link(first) {
            Some(link) => Some(link.prev),
            None => inconsistent(),
        }
    }

    /// Insert `item` before `before`, or at the back if `before` is `None`.
    ///
    /// Panics if `item` is already linked.
    #[track_caller]
    pub fn insert(&mut self, item: Index, before: Option<Index>) {
        assert!(self.link(item).is_none(), "list item is already linked");

        let first = match self.first() {
            Some(first) => first,
            None => {
                debug_assert!(before.is_none());
                self.set_link(
                    item,
                    Some(Link {
                        prev: item,
                        next: item,
                    }),
                );
                self.set_first(Some(item));
                return;
            }
        };

        let next = before.unwrap_or(first);
        let prev = match self.link(next) {
            Some(link) => link.prev,
            None => inconsistent(),
        };

        self.update_link(prev, |l| l.next = item);
        self.update_link(next, |l| l.prev = item);
        self.set_link(item, Some(Link { prev, next }));

        if before == Some(first) {
            self.set_first(Some(item));
        }
    }

    /// Insert `item` right after `after`, which must be linked.
    #[track_caller]
    pub fn insert_after(&mut self, item: Index, after: Index) {
        let before = self.next(after);
        self.insert(item, before);
    }

    #[inline]
    #[track_caller]
    pub fn push_back(&mut self, item: Index) {
        self.insert(item, None);
    }

    /// Unlink `item`.
    ///
    /// Panics if `item` isn't linked.
    #[track_caller]
    pub fn remove(&mut self, item: Index) {
        let link = self.linked(item);

        if self.first() == Some(item) {
            if link.next == item {
                // That was the last one
                self.set_first(None);
                self.set_link(item, None);
                return;
            }
            self.set_first(Some(link.next));
        }

        self.update_link(link.prev, |l| l.next = link.next);
        self.update_link(link.next, |l| l.prev = link.prev);
        self.set_link(item, None);
    }

    pub fn pop_front(&mut self) -> Option<Index> {
        let item = self.first()?;
        self.remove(item);
        Some(item)
    }

    /// Get the element following `item`, or `None` if `item` is the last one.
    #[track_caller]
    pub fn next(&self, item: Index) -> Option<Index> {
        let next = self.linked(item).next;
        (Some(next) != self.first()).then(|| next)
    }

    /// Get the element preceding `item`, or `None` if `item` is the first one.
    #[track_caller]
    pub fn prev(&self, item: Index) -> Option<Index> {
        let prev = self.linked(item).prev;
        (Some(item) != self.first()).then(|| prev)
    }

    pub fn iter(&self) -> Iter<'_, Self, Index> {
        Iter {
            accessor: self,
            next: self.first(),
        }
    }
}

/// An iterator over the elements of a list, front to back.
pub struct Iter<'b, Accessor, Index> {
    accessor: &'b Accessor,
    next: Option<Index>,
}

impl<'a, 'b, HeadCell, Index, Pool, MapLink, Element, LinkCell, CellKey> Iterator
    for Iter<'b, ListAccessor<'a, HeadCell, Pool, MapLink, CellKey>, Index>
where
    HeadCell: CellLike<CellKey, Target = ListHead<Index>>,
    Pool: ops::Index<Index, Output = Element> + ?Sized,
    MapLink: Fn(&Element) -> &LinkCell,
    Element: 'a,
    LinkCell: CellLike<CellKey, Target = Option<Link<Index>>>,
    Index: PartialEq + Copy,
{
    type Item = (Index, &'a Element);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next.take()?;
        self.next = self.accessor.next(item);
        let pool: &'a Pool = self.accessor.pool;
        Some((item, &pool[item]))
    }
}

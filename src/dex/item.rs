use log::debug;
use std::ops::Deref;
use std::rc::Rc;

/// Handle to a data item that may be referenced from more than one owner.
///
/// Items loaded from a file start out `Shared`: every owner that pointed at the same offset
/// holds the same `Rc`. Mutation must go through [`Item::edit`], which copies a shared item
/// exactly once and leaves the other owners untouched.
#[derive(Debug, Clone)]
pub enum Item<T>
{
    Shared(Rc<T>),
    Unique(T),
}

impl<T> Item<T>
{
    pub fn unique(value: T) -> Item<T>
    {
        Item::Unique(value)
    }

    pub fn shared(value: Rc<T>) -> Item<T>
    {
        Item::Shared(value)
    }

    pub fn is_shared(&self) -> bool
    {
        matches!(self, Item::Shared(_))
    }

    pub fn get(&self) -> &T
    {
        match self
        {
            Item::Shared(rc) => rc,
            Item::Unique(value) => value,
        }
    }

    /// True when both handles point at the very same shared allocation.
    pub fn same_item(&self, other: &Item<T>) -> bool
    {
        match (self, other)
        {
            (Item::Shared(a), Item::Shared(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn into_shared(self) -> Rc<T>
    {
        match self
        {
            Item::Shared(rc) => rc,
            Item::Unique(value) => Rc::new(value),
        }
    }
}

impl<T: Clone> Item<T>
{
    /// Returns the private copy, making it first if the item is still shared.
    pub fn edit(&mut self) -> &mut T
    {
        if let Item::Shared(rc) = self
        {
            debug!("copy-on-write: unique {} made from shared item", std::any::type_name::<T>());
            *self = Item::Unique(T::clone(rc));
        }
        match self
        {
            Item::Unique(value) => value,
            Item::Shared(rc) => Rc::make_mut(rc),
        }
    }
}

impl<T> Deref for Item<T>
{
    type Target = T;

    fn deref(&self) -> &T
    {
        self.get()
    }
}

impl<T: PartialEq> PartialEq for Item<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.get() == other.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_copies_shared_once() {
        let source = Rc::new(vec![1u16, 2, 3]);
        let mut a = Item::shared(Rc::clone(&source));
        let b = Item::shared(Rc::clone(&source));
        assert!(a.same_item(&b));

        a.edit().push(4);
        assert!(!a.is_shared());
        assert_eq!(a.get(), &vec![1, 2, 3, 4]);
        assert_eq!(b.get(), &vec![1, 2, 3]);
        assert_eq!(Rc::strong_count(&source), 2);

        a.edit().push(5);
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn equality_is_by_content() {
        let a = Item::unique(String::from("x"));
        let b = Item::shared(Rc::new(String::from("x")));
        assert_eq!(a, b);
        assert!(!a.same_item(&b));
    }
}

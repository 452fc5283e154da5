use tokio::sync::watch;

/// 購読可能な値。最新値だけを保持し、更新のたびに購読者へ通知する。
#[derive(Debug)]
pub struct Store<T> {
    tx: watch::Sender<T>,
}

impl<T> Store<T> {
    pub fn new(value: T) -> Self {
        Self {
            tx: watch::Sender::new(value),
        }
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// 値を書き換える。`f` が false を返したら通知しない。
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Store<T> {
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T: PartialEq> Store<T> {
    /// 値が変わったときだけ通知する
    pub fn set_if_changed(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

impl<T: Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_notifies() {
        let store = Store::new(1);
        let mut rx = store.subscribe();
        store.set(2);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn test_set_if_changed_skips_equal() {
        let store = Store::new("a".to_string());
        let rx = store.subscribe();
        assert!(!store.set_if_changed("a".to_string()));
        assert!(!rx.has_changed().unwrap());
        assert!(store.set_if_changed("b".to_string()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.get(), "b");
    }

    #[test]
    fn test_update() {
        let store: Store<Vec<u32>> = Store::default();
        store.update(|v| {
            v.push(3);
            true
        });
        assert_eq!(store.get(), vec![3]);
    }
}

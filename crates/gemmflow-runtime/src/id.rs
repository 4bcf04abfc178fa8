#[macro_export]
/// Create a new id type backed by a global counter.
macro_rules! storage_id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Hash, PartialEq, Eq, Debug, PartialOrd, Ord)]
        pub struct $name {
            value: usize,
        }

        impl $name {
            /// Create a new ID.
            pub fn new() -> Self {
                use core::sync::atomic::{AtomicUsize, Ordering};

                static COUNTER: AtomicUsize = AtomicUsize::new(0);

                let value = COUNTER.fetch_add(1, Ordering::Relaxed);
                if value == usize::MAX {
                    core::panic!("Memory ID overflowed");
                }
                Self { value }
            }

            /// The raw value of the id.
            pub fn value(&self) -> usize {
                self.value
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_fmt(format_args!("{}({})", core::stringify!($name), self.value))
            }
        }
    };
}

storage_id_type!(
    /// Identifies an engine, i.e. one device and the memory it owns.
    EngineId
);
storage_id_type!(
    /// Identifies a device queue.
    QueueId
);
storage_id_type!(
    /// Identifies an asynchronous operation submitted to a queue.
    DependencyId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let first = QueueId::new();
        let second = QueueId::new();

        assert_ne!(first, second);
        assert!(second.value() > first.value());
    }

    #[test]
    fn display_contains_type_name() {
        let id = EngineId::new();

        assert!(id.to_string().starts_with("EngineId("));
    }
}

use std::{
    borrow::Borrow,
    hash::{BuildHasherDefault, Hash, Hasher},
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crossbeam_epoch::Owned;

#[derive(Clone, Debug)]
pub(crate) struct NoisyDropper<T: ?Sized> {
    parent: Arc<DropNotifier>,
    pub elem: T,
}

impl<T> NoisyDropper<T> {
    pub(crate) fn new(parent: Arc<DropNotifier>, elem: T) -> Self {
        Self { parent, elem }
    }
}

impl<T: ?Sized> Drop for NoisyDropper<T> {
    fn drop(&mut self) {
        assert!(!self.parent.dropped.swap(true, Ordering::Relaxed));
    }
}

impl<T: ?Sized + PartialEq> PartialEq for NoisyDropper<T> {
    fn eq(&self, other: &Self) -> bool {
        self.elem == other.elem
    }
}

impl<T: ?Sized + Eq> Eq for NoisyDropper<T> {}

impl<T: ?Sized + Hash> Hash for NoisyDropper<T> {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.elem.hash(hasher);
    }
}

impl<T: ?Sized> Borrow<T> for NoisyDropper<T> {
    fn borrow(&self) -> &T {
        &self.elem
    }
}

impl<T: ?Sized> Deref for NoisyDropper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.elem
    }
}

#[derive(Debug)]
pub(crate) struct DropNotifier {
    dropped: AtomicBool,
}

impl DropNotifier {
    pub(crate) fn new() -> Self {
        Self {
            dropped: AtomicBool::new(false),
        }
    }

    pub(crate) fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Hashes an integer to itself, so tests can pick values that collide.
#[derive(Default)]
pub(crate) struct Identity(u64);

impl Hasher for Identity {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = (self.0 << 8) | u64::from(*b);
        }
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }

    fn write_u32(&mut self, i: u32) {
        self.0 = u64::from(i);
    }

    fn write_usize(&mut self, i: usize) {
        self.0 = i as u64;
    }
}

pub(crate) type IdentityHasher = BuildHasherDefault<Identity>;

/// Pushes enough garbage through the epoch collector that everything
/// deferred so far gets destroyed.
pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}

/// Writes the tests every concurrent set has to pass. `$s` must have `new`,
/// `with_capacity` and `&self` versions of `add`, `remove`, `contains` and
/// `size`.
#[macro_export]
macro_rules! write_concurrent_test_cases {
    ($s:ident) => {
        #[test]
        fn insertion() {
            const MAX_VALUE: i32 = 512;

            let set = $s::with_capacity(MAX_VALUE as usize);

            for i in 0..MAX_VALUE {
                assert!(set.add(i));

                assert!(!set.is_empty());
                assert_eq!(set.size(), (i + 1) as usize);

                for j in 0..=i {
                    assert!(set.contains(&j));
                    assert!(!set.add(j));
                }

                for k in i + 1..MAX_VALUE {
                    assert!(!set.contains(&k));
                }
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn growth() {
            const MAX_VALUE: i32 = 512;

            let set = $s::with_capacity(2);

            for i in 0..MAX_VALUE {
                assert!(set.add(i));
                assert_eq!(set.size(), (i + 1) as usize);

                for j in 0..=i {
                    assert!(set.contains(&j));
                }
            }

            assert!(set.capacity() > 2);

            $crate::test_util::run_deferred();
        }

        #[test]
        fn removal() {
            const MAX_VALUE: i32 = 512;

            let set = $s::with_capacity(MAX_VALUE as usize);

            for i in 0..MAX_VALUE {
                assert!(set.add(i));
            }

            for i in 0..MAX_VALUE {
                assert!(set.remove(&i));
                assert!(!set.remove(&i));
            }

            assert!(set.is_empty());
            assert_eq!(set.size(), 0);

            for i in 0..MAX_VALUE {
                assert!(!set.contains(&i));
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_insertion() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 16;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE;

            let set = std::sync::Arc::new($s::new());
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(set.add(j));
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(std::thread::JoinHandle::join) {
                assert!(result.is_ok());
            }

            assert_eq!(set.size(), MAX_INSERTED_VALUE as usize);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(set.contains(&i));
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_duplicate_insertion() {
            const MAX_VALUE: i32 = 1024;
            const NUM_THREADS: usize = 8;

            let set = std::sync::Arc::new($s::with_capacity(4));
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            // Every thread races to add the same values; each value must be
            // added by exactly one of them.
            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|_| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();
                        (0..MAX_VALUE).filter(|j| set.add(*j)).count()
                    })
                })
                .collect();

            let added: usize = threads
                .into_iter()
                .map(|t| t.join().expect("Thread failed"))
                .sum();

            assert_eq!(added, MAX_VALUE as usize);
            assert_eq!(set.size(), MAX_VALUE as usize);

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_removal() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 16;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE;

            let set = $s::with_capacity(MAX_INSERTED_VALUE as usize);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(set.add(i));
            }

            let set = std::sync::Arc::new(set);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(set.remove(&j));
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(|t| t.join()) {
                assert!(result.is_ok());
            }

            assert_eq!(set.size(), 0);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(!set.contains(&i));
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_insertion_and_removal() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 8;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE * 2;
            const INSERTED_MIDPOINT: i32 = MAX_INSERTED_VALUE / 2;

            let set = $s::with_capacity(16);

            for i in INSERTED_MIDPOINT..MAX_INSERTED_VALUE {
                assert!(set.add(i));
            }

            let set = std::sync::Arc::new(set);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS * 2));

            let insert_threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(set.add(j));
                        }
                    })
                })
                .collect();

            let remove_threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in
                            (0..MAX_VALUE).map(|j| INSERTED_MIDPOINT + j + (i as i32 * MAX_VALUE))
                        {
                            assert!(set.remove(&j));
                        }
                    })
                })
                .collect();

            for result in insert_threads
                .into_iter()
                .chain(remove_threads.into_iter())
                .map(std::thread::JoinHandle::join)
            {
                assert!(result.is_ok());
            }

            assert_eq!(set.size(), INSERTED_MIDPOINT as usize);

            for i in 0..INSERTED_MIDPOINT {
                assert!(set.contains(&i));
            }

            for i in INSERTED_MIDPOINT..MAX_INSERTED_VALUE {
                assert!(!set.contains(&i));
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_mixed_workload() {
            const NUM_OPS: u32 = 4096;
            const NUM_THREADS: u32 = 8;
            const KEY_SPACE: u32 = 1024;

            let set = std::sync::Arc::new($s::with_capacity(8));
            for i in 0..KEY_SPACE / 2 {
                assert!(set.add(i));
            }
            let initial = set.size() as i64;

            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS as usize));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|t| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        let mut delta = 0i64;
                        for n in 0..NUM_OPS {
                            let v = (n * 7 + t * 131) % KEY_SPACE;
                            match (n + t) % 10 {
                                0..=7 => {
                                    set.contains(&v);
                                }
                                8 => delta += i64::from(set.add(v)),
                                _ => delta -= i64::from(set.remove(&v)),
                            }
                        }
                        delta
                    })
                })
                .collect();

            let delta: i64 = threads
                .into_iter()
                .map(|t| t.join().expect("Thread failed"))
                .sum();

            assert_eq!(set.size() as i64, initial + delta);
            assert_eq!(
                (0..KEY_SPACE).filter(|v| set.contains(v)).count(),
                set.size()
            );

            $crate::test_util::run_deferred();
        }
    };
}

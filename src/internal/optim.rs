cfg_if::cfg_if! {
    if #[cfg(feature = "nightly")] {
        #[doc(hidden)]
        #[inline(always)]
        pub fn _unlikely(b: bool) -> bool {
            core::intrinsics::unlikely(b)
        }

        #[doc(hidden)]
        #[inline(always)]
        pub fn _likely(b: bool) -> bool {
            core::intrinsics::likely(b)
        }
    } else {
        #[cold]
        #[inline(never)]
        fn cold() {}

        #[doc(hidden)]
        #[inline(always)]
        pub fn _unlikely(b: bool) -> bool {
            if b {
                cold()
            }
            b
        }

        #[doc(hidden)]
        #[inline(always)]
        pub fn _likely(b: bool) -> bool {
            if !b {
                cold()
            }
            b
        }
    }
}

macro_rules! unlikely {
    ($e:expr) => {
        $crate::internal::optim::_unlikely($e)
    };
}

macro_rules! likely {
    ($e:expr) => {{
        $crate::internal::optim::_likely($e)
    }};
}

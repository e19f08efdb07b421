/// Builds a [`MetaObject`](crate::MetaObject) from method and signal tables.
///
/// ```
/// use rebus::meta_object;
///
/// let meta = meta_object! {
///     methods {
///         3 => add "(ii)i",
///         5 => version "()s",
///     }
///     signals {
///         9 => changed "(i)",
///     }
/// };
/// assert_eq!(meta.method(3).unwrap().name(), "add");
/// ```
#[macro_export]
macro_rules! meta_object {
    (
        methods { $($method_id:expr => $method_name:ident $method_sig:literal),* $(,)? }
        $(signals { $($signal_id:expr => $signal_name:ident $signal_sig:literal),* $(,)? })?
    ) => {{
        let builder = $crate::MetaObject::builder();
        $(let builder = builder.method($method_id, stringify!($method_name), $method_sig);)*
        $($(let builder = builder.signal($signal_id, stringify!($signal_name), $signal_sig);)*)?
        builder.build()
    }};
}

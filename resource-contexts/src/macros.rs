//! Declaration and call-site sugar for context-taking operations.

/// Declares a resource-creating operation, inserting the context parameter.
///
/// The first parameter names the context; it becomes
/// `ctx: &ResourceContext` in the generated signature. For methods it
/// follows the receiver, which may be `&self`, `&mut self` or `self`.
///
/// Generic parameters and `where` clauses are not accepted; write the
/// `ctx: &ResourceContext` parameter by hand for those.
///
/// ```rust,ignore
/// resource_fn! {
///     /// Opens a socket that is shut down at cleanup.
///     pub fn connect(ctx, addr: SocketAddr) -> io::Result<Managed<TcpStream>> {
///         Ok(ctx.manage(TcpStream::connect(addr)?))
///     }
/// }
///
/// impl Pool {
///     resource_fn! {
///         pub fn checkout(&self, ctx) -> Managed<Conn> {
///             ctx.manage(self.take())
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! resource_fn {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident ( & mut $this:ident , $ctx:ident $(, $arg:ident : $ty:ty)* $(,)? )
        $(-> $ret:ty)? $body:block
    ) => {
        $(#[$meta])*
        $vis fn $name(&mut $this, $ctx: &$crate::ResourceContext $(, $arg: $ty)*) $(-> $ret)? $body
    };
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident ( & $this:ident , $ctx:ident $(, $arg:ident : $ty:ty)* $(,)? )
        $(-> $ret:ty)? $body:block
    ) => {
        $(#[$meta])*
        $vis fn $name(&$this, $ctx: &$crate::ResourceContext $(, $arg: $ty)*) $(-> $ret)? $body
    };
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident ( $this:ident , $ctx:ident $(, $arg:ident : $ty:ty)* $(,)? )
        $(-> $ret:ty)? $body:block
    ) => {
        $(#[$meta])*
        $vis fn $name($this, $ctx: &$crate::ResourceContext $(, $arg: $ty)*) $(-> $ret)? $body
    };
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident ( $ctx:ident $(, $arg:ident : $ty:ty)* $(,)? )
        $(-> $ret:ty)? $body:block
    ) => {
        $(#[$meta])*
        $vis fn $name($ctx: &$crate::ResourceContext $(, $arg: $ty)*) $(-> $ret)? $body
    };
}

/// Calls a context-taking operation with the current context.
///
/// `here!(f(a, b))` expands to
/// `f(&current_context(CallSite::Function), a, b)`, and
/// `here!(recv.method(a))` to `recv.method(&current_context(..), a)`.
/// Outside any scope the global context is used and a warning names the
/// call site.
#[macro_export]
macro_rules! here {
    ($recv:ident . $method:ident ( $($arg:expr),* $(,)? )) => {
        $recv.$method(&$crate::current_context($crate::CallSite::Function) $(, $arg)*)
    };
    ($($segment:ident)::+ ( $($arg:expr),* $(,)? )) => {
        $($segment)::+(&$crate::current_context($crate::CallSite::Function) $(, $arg)*)
    };
}

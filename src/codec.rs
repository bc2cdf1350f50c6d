//! Binary argument codec.
//!
//! Arguments are serialized on the producer into the record payload with no
//! formatting and no allocation; the backend decodes them into type-erased
//! [`ArgValue`]s for the pattern formatter. Scalars are raw host-endian
//! copies, strings are `u32 length || bytes`, sequences are
//! `u32 count || elem…`.
//!
//! Sizing is two-pass: `encoded_size` walks the arguments once and parks
//! every dynamic length in a thread-owned [`SizeCache`]; `encode` consumes
//! the cached entries in the same pre-order so nothing is measured twice.
//!
//! Decoding is dispatched through one monomorphized function pointer per
//! call site: [`EncodeArgs`] is implemented for argument tuples and exposes
//! `DECODER`, which the logging macros plant in the record header. No trait
//! objects, no per-record type registration.

use smallvec::SmallVec;

/// Scratch list of dynamic sizes computed during the sizing pass and
/// consumed during encoding. Reused across records by the owning thread.
#[derive(Default)]
pub struct SizeCache {
  sizes: Vec<u32>,
  idx: usize,
}

impl SizeCache {
  #[inline(always)]
  pub fn reset(&mut self) {
    self.sizes.clear();
    self.idx = 0;
  }

  #[inline(always)]
  pub fn push(&mut self, n: u32) {
    self.sizes.push(n);
  }

  #[inline(always)]
  fn next(&mut self) -> u32 {
    let n = self.sizes[self.idx];
    self.idx += 1;
    n
  }
}

/// Writes the payload into a reserved queue frame.
pub struct PayloadWriter<'a> {
  buf: &'a mut [u8],
  pos: usize,
  cache: &'a mut SizeCache,
}

impl<'a> PayloadWriter<'a> {
  pub(crate) fn new(buf: &'a mut [u8], cache: &'a mut SizeCache) -> Self {
    PayloadWriter { buf, pos: 0, cache }
  }

  #[inline(always)]
  pub fn put_bytes(&mut self, src: &[u8]) {
    self.buf[self.pos..self.pos + src.len()].copy_from_slice(src);
    self.pos += src.len();
  }

  #[inline(always)]
  pub fn put_u32(&mut self, v: u32) {
    self.put_bytes(&v.to_ne_bytes());
  }

  /// Next length recorded by the sizing pass.
  #[inline(always)]
  pub fn cached_size(&mut self) -> u32 {
    self.cache.next()
  }
}

/// Reads a record payload on the backend.
pub struct PayloadReader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> PayloadReader<'a> {
  pub(crate) fn new(buf: &'a [u8]) -> Self {
    PayloadReader { buf, pos: 0 }
  }

  #[inline(always)]
  pub fn take(&mut self, n: usize) -> &'a [u8] {
    let s = &self.buf[self.pos..self.pos + n];
    self.pos += n;
    s
  }

  #[inline(always)]
  pub fn take_u32(&mut self) -> u32 {
    u32::from_ne_bytes(self.take(4).try_into().unwrap())
  }
}

/// A decoded argument, ready for the formatter.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
  Bool(bool),
  Char(char),
  I64(i64),
  U64(u64),
  F64(f64),
  Str(String),
  StaticStr(&'static str),
  Bytes(Vec<u8>),
  Seq(Vec<ArgValue>),
  Pair(Box<(ArgValue, ArgValue)>),
}

impl std::fmt::Display for ArgValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ArgValue::Bool(v) => write!(f, "{v}"),
      ArgValue::Char(v) => write!(f, "{v}"),
      ArgValue::I64(v) => write!(f, "{v}"),
      ArgValue::U64(v) => write!(f, "{v}"),
      ArgValue::F64(v) => write!(f, "{v}"),
      ArgValue::Str(v) => f.write_str(v),
      ArgValue::StaticStr(v) => f.write_str(v),
      ArgValue::Bytes(v) => {
        f.write_str("[")?;
        for (i, b) in v.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{b}")?;
        }
        f.write_str("]")
      }
      ArgValue::Seq(v) => {
        f.write_str("[")?;
        for (i, e) in v.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{e}")?;
        }
        f.write_str("]")
      }
      ArgValue::Pair(p) => write!(f, "({}, {})", p.0, p.1),
    }
  }
}

/// Capability set for loggable values: measure, serialize, deserialize.
/// `decode` is an associated function so it can be erased into a plain
/// function pointer.
pub trait Encode {
  fn encoded_size(&self, cache: &mut SizeCache) -> usize;
  fn encode(&self, w: &mut PayloadWriter<'_>);
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue
  where
    Self: Sized;
}

impl<'a, T: Encode> Encode for &'a T {
  #[inline(always)]
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    (**self).encoded_size(cache)
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    (**self).encode(w)
  }
  #[inline(always)]
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    T::decode(r)
  }
}

macro_rules! impl_num_encode {
  ($($ty:ty => $variant:ident as $wide:ty),+ $(,)?) => {$(
    impl Encode for $ty {
      #[inline(always)]
      fn encoded_size(&self, _: &mut SizeCache) -> usize {
        std::mem::size_of::<$ty>()
      }
      #[inline(always)]
      fn encode(&self, w: &mut PayloadWriter<'_>) {
        w.put_bytes(&self.to_ne_bytes());
      }
      #[inline(always)]
      fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
        let v = <$ty>::from_ne_bytes(r.take(std::mem::size_of::<$ty>()).try_into().unwrap());
        ArgValue::$variant(v as $wide)
      }
    }
  )+};
}

impl_num_encode! {
  i8 => I64 as i64, i16 => I64 as i64, i32 => I64 as i64, i64 => I64 as i64, isize => I64 as i64,
  u8 => U64 as u64, u16 => U64 as u64, u32 => U64 as u64, u64 => U64 as u64, usize => U64 as u64,
  f32 => F64 as f64, f64 => F64 as f64,
}

impl Encode for bool {
  #[inline(always)]
  fn encoded_size(&self, _: &mut SizeCache) -> usize {
    1
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    w.put_bytes(&[*self as u8]);
  }
  #[inline(always)]
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    ArgValue::Bool(r.take(1)[0] != 0)
  }
}

impl Encode for char {
  #[inline(always)]
  fn encoded_size(&self, _: &mut SizeCache) -> usize {
    4
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    w.put_u32(*self as u32);
  }
  #[inline(always)]
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    ArgValue::Char(char::from_u32(r.take_u32()).unwrap_or(char::REPLACEMENT_CHARACTER))
  }
}

// String data is copied inline; the blanket &T impl cannot cover &str (str
// is unsized), so the borrowed form gets its own impl, as std does for
// ToOwned.
impl<'a> Encode for &'a str {
  #[inline(always)]
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    cache.push(self.len() as u32);
    4 + self.len()
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    let n = w.cached_size();
    w.put_u32(n);
    w.put_bytes(&self.as_bytes()[..n as usize]);
  }
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    let n = r.take_u32() as usize;
    ArgValue::Str(String::from_utf8_lossy(r.take(n)).into_owned())
  }
}

impl Encode for String {
  #[inline(always)]
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    self.as_str().encoded_size(cache)
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    self.as_str().encode(w)
  }
  #[inline(always)]
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    <&str>::decode(r)
  }
}

/// Borrowed `'static` string, encoded as a pointer instead of a copy. The
/// leading discriminator byte marks the frame as a borrow on the wire; the
/// backend reads the same address, which the `'static` bound keeps valid.
#[derive(Copy, Clone, Debug)]
pub struct StrRef(pub &'static str);

const BORROW_TAG: u8 = 1;

impl Encode for StrRef {
  #[inline(always)]
  fn encoded_size(&self, _: &mut SizeCache) -> usize {
    1 + 2 * std::mem::size_of::<usize>()
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    w.put_bytes(&[BORROW_TAG]);
    w.put_bytes(&(self.0.as_ptr() as usize).to_ne_bytes());
    w.put_bytes(&self.0.len().to_ne_bytes());
  }
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    debug_assert_eq!(r.take(1)[0], BORROW_TAG);
    let ptr = usize::from_ne_bytes(r.take(std::mem::size_of::<usize>()).try_into().unwrap()) as *const u8;
    let len = usize::from_ne_bytes(r.take(std::mem::size_of::<usize>()).try_into().unwrap());
    let s = unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(ptr, len)) };
    ArgValue::StaticStr(s)
  }
}

/// Borrowed byte string, copied inline as `u32 length || bytes`.
#[derive(Copy, Clone, Debug)]
pub struct Blob<'a>(pub &'a [u8]);

impl Encode for Blob<'_> {
  #[inline(always)]
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    cache.push(self.0.len() as u32);
    4 + self.0.len()
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    let n = w.cached_size();
    w.put_u32(n);
    w.put_bytes(&self.0[..n as usize]);
  }
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    let n = r.take_u32() as usize;
    ArgValue::Bytes(r.take(n).to_vec())
  }
}

impl<'a, T: Encode> Encode for &'a [T] {
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    cache.push(self.len() as u32);
    4 + self.iter().map(|e| e.encoded_size(cache)).sum::<usize>()
  }
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    let n = w.cached_size();
    w.put_u32(n);
    for e in &self[..n as usize] {
      e.encode(w);
    }
  }
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    let n = r.take_u32() as usize;
    ArgValue::Seq((0..n).map(|_| T::decode(r)).collect())
  }
}

impl<T: Encode> Encode for Vec<T> {
  #[inline(always)]
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    self.as_slice().encoded_size(cache)
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    self.as_slice().encode(w)
  }
  #[inline(always)]
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    <&[T]>::decode(r)
  }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
  #[inline(always)]
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    self.as_slice().encoded_size(cache)
  }
  #[inline(always)]
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    self.as_slice().encode(w)
  }
  #[inline(always)]
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    <&[T]>::decode(r)
  }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    self.0.encoded_size(cache) + self.1.encoded_size(cache)
  }
  fn encode(&self, w: &mut PayloadWriter<'_>) {
    self.0.encode(w);
    self.1.encode(w);
  }
  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    ArgValue::Pair(Box::new((A::decode(r), B::decode(r))))
  }
}

/// Implement [`Encode`] for a trivially-copyable user type by raw-copying
/// its storage. The type must be `bytemuck::Pod` and `Display`; the decoded
/// value is its `Display` rendering.
#[macro_export]
macro_rules! impl_pod_encode {
  ($ty:ty) => {
    impl $crate::codec::Encode for $ty {
      #[inline(always)]
      fn encoded_size(&self, _: &mut $crate::codec::SizeCache) -> usize {
        ::std::mem::size_of::<$ty>()
      }
      #[inline(always)]
      fn encode(&self, w: &mut $crate::codec::PayloadWriter<'_>) {
        w.put_bytes($crate::bytemuck::bytes_of(self));
      }
      fn decode(r: &mut $crate::codec::PayloadReader<'_>) -> $crate::codec::ArgValue {
        let v: $ty = $crate::bytemuck::pod_read_unaligned(r.take(::std::mem::size_of::<$ty>()));
        $crate::codec::ArgValue::Str(v.to_string())
      }
    }
  };
}

/// Erased decoder planted in every record header: one monomorphized
/// function per call site.
pub type DecodeFn = fn(&mut PayloadReader<'_>) -> SmallVec<[ArgValue; 8]>;

/// An argument tuple as captured by a log statement.
pub trait EncodeArgs {
  const DECODER: DecodeFn;
  fn encoded_size(&self, cache: &mut SizeCache) -> usize;
  fn encode(&self, w: &mut PayloadWriter<'_>);
  fn decode_erased(r: &mut PayloadReader<'_>) -> SmallVec<[ArgValue; 8]>
  where
    Self: Sized;
}

impl EncodeArgs for () {
  const DECODER: DecodeFn = Self::decode_erased;
  #[inline(always)]
  fn encoded_size(&self, _: &mut SizeCache) -> usize {
    0
  }
  #[inline(always)]
  fn encode(&self, _: &mut PayloadWriter<'_>) {}
  #[inline(always)]
  fn decode_erased(_: &mut PayloadReader<'_>) -> SmallVec<[ArgValue; 8]> {
    SmallVec::new()
  }
}

macro_rules! impl_encode_args {
  ($($T:ident . $idx:tt),+) => {
    impl<$($T: Encode),+> EncodeArgs for ($($T,)+) {
      const DECODER: DecodeFn = Self::decode_erased;
      #[inline(always)]
      fn encoded_size(&self, cache: &mut SizeCache) -> usize {
        0 $(+ self.$idx.encoded_size(cache))+
      }
      #[inline(always)]
      fn encode(&self, w: &mut PayloadWriter<'_>) {
        $(self.$idx.encode(w);)+
      }
      fn decode_erased(r: &mut PayloadReader<'_>) -> SmallVec<[ArgValue; 8]> {
        let mut out = SmallVec::new();
        $(out.push($T::decode(r));)+
        out
      }
    }
  };
}

impl_encode_args!(A.0);
impl_encode_args!(A.0, B.1);
impl_encode_args!(A.0, B.1, C.2);
impl_encode_args!(A.0, B.1, C.2, D.3);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13, O.14);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13, O.14, P.15);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13, O.14, P.15, Q.16);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13, O.14, P.15, Q.16, R.17);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13, O.14, P.15, Q.16, R.17, S.18);
impl_encode_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11, M.12, N.13, O.14, P.15, Q.16, R.17, S.18, T.19);

#[cfg(test)]
mod tests {
  use super::*;

  fn roundtrip<A: EncodeArgs>(args: &A) -> SmallVec<[ArgValue; 8]> {
    let mut cache = SizeCache::default();
    cache.reset();
    let size = args.encoded_size(&mut cache);
    let mut buf = vec![0u8; size];
    {
      let mut w = PayloadWriter::new(&mut buf, &mut cache);
      args.encode(&mut w);
    }
    let mut r = PayloadReader::new(&buf);
    A::DECODER(&mut r)
  }

  #[test]
  fn scalars_roundtrip() {
    let vals = roundtrip(&(&-42i32, &7u64, &2.5f64, &true, &'x'));
    assert_eq!(vals[0], ArgValue::I64(-42));
    assert_eq!(vals[1], ArgValue::U64(7));
    assert_eq!(vals[2], ArgValue::F64(2.5));
    assert_eq!(vals[3], ArgValue::Bool(true));
    assert_eq!(vals[4], ArgValue::Char('x'));
  }

  #[test]
  fn strings_roundtrip() {
    let owned = String::from("owned");
    let vals = roundtrip(&(&"borrowed", &owned));
    assert_eq!(vals[0], ArgValue::Str("borrowed".into()));
    assert_eq!(vals[1], ArgValue::Str("owned".into()));
  }

  #[test]
  fn static_str_travels_as_pointer() {
    let mut cache = SizeCache::default();
    let arg = StrRef("static text");
    assert_eq!(arg.encoded_size(&mut cache), 17);
    let vals = roundtrip(&(&arg,));
    assert_eq!(vals[0], ArgValue::StaticStr("static text"));
  }

  #[test]
  fn sequences_and_pairs_roundtrip() {
    let nums = vec![1i32, 2, 3];
    let pair = ("k", 9u32);
    let blob = Blob(&[0xde, 0xad]);
    let vals = roundtrip(&(&nums, &pair, &blob));
    assert_eq!(
      vals[0],
      ArgValue::Seq(vec![ArgValue::I64(1), ArgValue::I64(2), ArgValue::I64(3)])
    );
    assert_eq!(
      vals[1],
      ArgValue::Pair(Box::new((ArgValue::Str("k".into()), ArgValue::U64(9))))
    );
    assert_eq!(vals[2], ArgValue::Bytes(vec![0xde, 0xad]));
  }

  #[test]
  fn size_cache_is_consumed_in_order() {
    let mut cache = SizeCache::default();
    cache.reset();
    let args = (&"ab", &vec!["cd".to_string(), "efg".to_string()]);
    let size = EncodeArgs::encoded_size(&args, &mut cache);
    // "ab": 4+2; vec: 4 + (4+2) + (4+3)
    assert_eq!(size, 6 + 4 + 6 + 7);
    let mut buf = vec![0u8; size];
    let mut w = PayloadWriter::new(&mut buf, &mut cache);
    EncodeArgs::encode(&args, &mut w);
    let mut r = PayloadReader::new(&buf);
    let vals = <(&str, Vec<String>) as EncodeArgs>::decode_erased(&mut r);
    assert_eq!(vals[0], ArgValue::Str("ab".into()));
    assert_eq!(
      vals[1],
      ArgValue::Seq(vec![ArgValue::Str("cd".into()), ArgValue::Str("efg".into())])
    );
  }

  #[test]
  fn display_rendering() {
    assert_eq!(ArgValue::F64(220.10).to_string(), "220.1");
    assert_eq!(ArgValue::F64(20.0).to_string(), "20");
    assert_eq!(
      ArgValue::Seq(vec![ArgValue::U64(1), ArgValue::U64(2)]).to_string(),
      "[1, 2]"
    );
  }
}

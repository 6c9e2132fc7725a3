#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]

use std::{
  ffi::{c_int, c_void},
  marker::{PhantomData, PhantomPinned},
  ptr::null,
  time::Duration,
};

use tracing::trace;

use crate::{AssertionBackend, AssertionId, AssertionKind, ReturnCode};

/// Power assertions through IOKit's IOPMAssertion API, the same mechanism caffeinate(8) uses.
#[derive(Debug, Default, Clone, Copy)]
pub struct IOKitBackend;

impl AssertionBackend for IOKitBackend {
  fn create(&self, kind: AssertionKind, reason: &str) -> Result<AssertionId, ReturnCode> {
    let Some(assertion_type) = kind.assertion_type() else {
      return self.declare_user_activity(reason);
    };
    let assertion_type = CFString::new(assertion_type)?;
    let name = CFString::new(reason)?;

    let mut id: IOPMAssertionID = 0;
    // SAFETY: both strings are live CFStrings for the duration of the call and id is a valid out
    // pointer
    let ret = unsafe {
      IOPMAssertionCreateWithName(assertion_type.0, kIOPMAssertionLevelOn, name.0, &mut id)
    };
    check(ret)?;
    trace!("IOPMAssertionCreateWithName. type={} id={}", kind, id);
    Ok(AssertionId(id))
  }

  fn declare_user_activity(&self, reason: &str) -> Result<AssertionId, ReturnCode> {
    let name = CFString::new(reason)?;

    let mut id: IOPMAssertionID = 0;
    // SAFETY: name is a live CFString for the duration of the call and id is a valid out pointer
    let ret = unsafe { IOPMAssertionDeclareUserActivity(name.0, kIOPMUserActiveLocal, &mut id) };
    check(ret)?;
    trace!("IOPMAssertionDeclareUserActivity. id={}", id);
    Ok(AssertionId(id))
  }

  fn release(&self, id: AssertionId) -> Result<(), ReturnCode> {
    // SAFETY: releasing an id we don't own just returns an error code
    check(unsafe { IOPMAssertionRelease(id.0) })
  }

  fn set_timeout(&self, id: AssertionId, timeout: Duration) -> Result<(), ReturnCode> {
    // IOKit counts whole seconds, round up so a short timeout doesn't become "never"
    let seconds = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    let seconds = CFNumber::new(i64::try_from(seconds).unwrap_or(i64::MAX))?;
    let timeout_key = CFString::new(kIOPMAssertionTimeoutKey)?;
    let action_key = CFString::new(kIOPMAssertionTimeoutActionKey)?;
    let release_action = CFString::new(kIOPMAssertionTimeoutActionRelease)?;

    // SAFETY: key and value are live CF objects for the duration of each call. IOKit retains
    // what it keeps.
    check(unsafe { IOPMAssertionSetProperty(id.0, timeout_key.0, seconds.0) })?;
    // SAFETY: as above
    check(unsafe { IOPMAssertionSetProperty(id.0, action_key.0, release_action.0 as CFTypeRef) })
  }
}

fn check(ret: IOReturn) -> Result<(), ReturnCode> {
  if ret == kIOReturnSuccess {
    Ok(())
  } else {
    Err(ReturnCode(ret))
  }
}

/// Owned CFString, released on drop.
struct CFString(CFStringRef);

impl CFString {
  fn new(s: &str) -> Result<Self, ReturnCode> {
    // SAFETY: bytes/len describe a valid UTF-8 buffer that CF copies before returning
    let string = unsafe {
      CFStringCreateWithBytes(
        null(),
        s.as_ptr(),
        s.len() as CFIndex,
        kCFStringEncodingUTF8,
        0,
      )
    };
    if string.is_null() {
      return Err(ReturnCode(kIOReturnNoMemory));
    }
    Ok(Self(string))
  }
}

impl Drop for CFString {
  fn drop(&mut self) {
    // SAFETY: we own the only reference from the Create call
    unsafe { CFRelease(self.0 as CFTypeRef) };
  }
}

/// Owned CFNumber, released on drop.
struct CFNumber(CFTypeRef);

impl CFNumber {
  fn new(value: i64) -> Result<Self, ReturnCode> {
    // SAFETY: value is a valid i64 that CF copies before returning
    let number = unsafe {
      CFNumberCreate(
        null(),
        kCFNumberSInt64Type,
        &value as *const i64 as *const c_void,
      )
    };
    if number.is_null() {
      return Err(ReturnCode(kIOReturnNoMemory));
    }
    Ok(Self(number))
  }
}

impl Drop for CFNumber {
  fn drop(&mut self) {
    // SAFETY: we own the only reference from the Create call
    unsafe { CFRelease(self.0) };
  }
}

type kern_return_t = c_int;

//
// Core Foundation
//

type CFTypeRef = *const c_void;
type CFAllocatorRef = *const c_void;
type CFIndex = isize;
type CFStringEncoding = u32;
type CFNumberType = CFIndex;
type Boolean = u8;

#[repr(C)]
struct __CFString {
  _data: [u8; 0],
  _marker: PhantomData<(*mut u8, PhantomPinned)>,
}
type CFStringRef = *const __CFString;

const kCFStringEncodingUTF8: CFStringEncoding = 0x0800_0100;
const kCFNumberSInt64Type: CFNumberType = 4;

#[cfg_attr(target_os = "macos", link(name = "CoreFoundation", kind = "framework"))]
extern "C" {
  fn CFStringCreateWithBytes(
    alloc: CFAllocatorRef,
    bytes: *const u8,
    numBytes: CFIndex,
    encoding: CFStringEncoding,
    isExternalRepresentation: Boolean,
  ) -> CFStringRef;
  fn CFNumberCreate(
    allocator: CFAllocatorRef,
    theType: CFNumberType,
    valuePtr: *const c_void,
  ) -> CFTypeRef;

  fn CFRelease(cf: CFTypeRef);
}

//
// IOKit
//

type IOReturn = kern_return_t;
type IOPMAssertionID = u32;
type IOPMAssertionLevel = u32;
type IOPMUserActiveType = u32;

const kIOReturnSuccess: IOReturn = 0;
const kIOReturnNoMemory: IOReturn = 0xe00002bd_u32 as IOReturn;

const kIOPMAssertionLevelOn: IOPMAssertionLevel = 255;
const kIOPMUserActiveLocal: IOPMUserActiveType = 0;

const kIOPMAssertionTimeoutKey: &str = "TimeoutSeconds";
const kIOPMAssertionTimeoutActionKey: &str = "TimeoutAction";
const kIOPMAssertionTimeoutActionRelease: &str = "TimeoutActionRelease";

#[cfg_attr(target_os = "macos", link(name = "IOKit", kind = "framework"))]
extern "C" {
  fn IOPMAssertionCreateWithName(
    AssertionType: CFStringRef,
    AssertionLevel: IOPMAssertionLevel,
    AssertionName: CFStringRef,
    AssertionID: *mut IOPMAssertionID,
  ) -> IOReturn;
  fn IOPMAssertionDeclareUserActivity(
    AssertionName: CFStringRef,
    userType: IOPMUserActiveType,
    AssertionID: *mut IOPMAssertionID,
  ) -> IOReturn;
  fn IOPMAssertionSetProperty(
    theAssertion: IOPMAssertionID,
    theProperty: CFStringRef,
    theValue: CFTypeRef,
  ) -> IOReturn;
  fn IOPMAssertionRelease(AssertionID: IOPMAssertionID) -> IOReturn;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn create_set_timeout_and_release() {
    let backend = IOKitBackend;
    let id = backend
      .create(AssertionKind::PreventUserIdleSystemSleep, "nodoze test")
      .unwrap();
    assert!(!id.is_none());
    backend.set_timeout(id, Duration::from_secs(60)).unwrap();
    backend.release(id).unwrap();
  }

  #[test]
  fn releasing_unknown_id_fails() {
    assert!(IOKitBackend.release(AssertionId(u32::MAX)).is_err());
  }

  #[test]
  fn strings_convert() {
    let string = CFString::new("keep awake ☕").unwrap();
    assert!(!string.0.is_null());
  }
}

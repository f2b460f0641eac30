use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use arrow::array::{Array, StructArray};
use arrow::datatypes::{DataType, Schema};
use arrow::ffi::{from_ffi_and_data_type, FFI_ArrowArray, FFI_ArrowSchema};
use fusebridge_native::*;

/// What a callback observed, copied out while the payload was valid.
#[derive(Debug)]
enum Outcome {
    Ok,
    Count(u64),
    ResultSet(*mut FbResultSet),
    Rows { rows: usize, columns: usize },
    Error(u32, String),
}

// result set pointers are only handed between test threads
unsafe impl Send for Outcome {}

fn senders() -> &'static Mutex<HashMap<u64, Sender<Outcome>>> {
    static SENDERS: OnceLock<Mutex<HashMap<u64, Sender<Outcome>>>> = OnceLock::new();
    SENDERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn expect(user_data: u64) -> Receiver<Outcome> {
    let (tx, rx) = mpsc::channel();
    senders().lock().unwrap().insert(user_data, tx);
    rx
}

fn send(user_data: u64, outcome: Outcome) {
    if let Some(tx) = senders().lock().unwrap().remove(&user_data) {
        tx.send(outcome).unwrap();
    }
}

unsafe fn error_outcome(error: *const FbErrorInfo) -> Outcome {
    let info = unsafe { &*error };
    let bytes = unsafe { std::slice::from_raw_parts(info.message, info.message_len as usize) };
    Outcome::Error(info.kind, String::from_utf8_lossy(bytes).into_owned())
}

unsafe extern "C" fn on_void(_result: *const c_void, error: *const FbErrorInfo, user_data: u64) {
    let outcome = if error.is_null() { Outcome::Ok } else { unsafe { error_outcome(error) } };
    send(user_data, outcome);
}

unsafe extern "C" fn on_count(result: *const c_void, error: *const FbErrorInfo, user_data: u64) {
    let outcome = if error.is_null() {
        Outcome::Count(unsafe { *result.cast::<u64>() })
    } else {
        unsafe { error_outcome(error) }
    };
    send(user_data, outcome);
}

unsafe extern "C" fn on_result_set(result: *const c_void, error: *const FbErrorInfo, user_data: u64) {
    let outcome = if error.is_null() {
        Outcome::ResultSet(unsafe { *result.cast::<*mut FbResultSet>() })
    } else {
        unsafe { error_outcome(error) }
    };
    send(user_data, outcome);
}

/// Moves every batch out of the record, as a consumer would.
unsafe extern "C" fn on_collect(result: *const c_void, error: *const FbErrorInfo, user_data: u64) {
    if !error.is_null() {
        send(user_data, unsafe { error_outcome(error) });
        return;
    }
    let record = unsafe { &*result.cast::<FbColumnarRecord>() };
    let ffi_schema = unsafe { ptr::replace(record.schema, FFI_ArrowSchema::empty()) };
    let schema = Schema::try_from(&ffi_schema).unwrap();
    let data_type = DataType::Struct(schema.fields().clone());
    let mut rows = 0;
    for i in 0..record.batch_count as usize {
        let array = unsafe { ptr::replace(record.batches.add(i), FFI_ArrowArray::empty()) };
        let data = unsafe { from_ffi_and_data_type(array, data_type.clone()) }.unwrap();
        rows += StructArray::from(data).len();
    }
    send(
        user_data,
        Outcome::Rows {
            rows,
            columns: schema.fields().len(),
        },
    );
}

fn wait(rx: &Receiver<Outcome>) -> Outcome {
    rx.recv_timeout(Duration::from_secs(30)).unwrap()
}

#[test]
fn test_register_query_count_collect() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("t.csv");
    std::fs::write(&csv, "a,b\n1,x\n2,y\n3,z\n").unwrap();
    let name = CString::new("t").unwrap();
    let path = CString::new(csv.to_str().unwrap()).unwrap();
    let sql = CString::new("SELECT a, b FROM t WHERE a > 1").unwrap();

    unsafe {
        let mut runtime = ptr::null_mut();
        assert_eq!(fb_runtime_new(2, 0, &mut runtime), FB_OK);
        let mut session = ptr::null_mut();
        assert_eq!(fb_session_new(runtime, &mut session), FB_OK);

        let rx = expect(1);
        let status = fb_session_register_csv(
            session,
            name.as_ptr(),
            path.as_ptr(),
            FbBytes::empty(),
            Some(on_void),
            1,
        );
        assert_eq!(status, FB_OK);
        assert!(matches!(wait(&rx), Outcome::Ok));

        let rx = expect(2);
        assert_eq!(
            fb_session_sql(session, sql.as_ptr(), FbBytes::empty(), Some(on_result_set), 2),
            FB_OK
        );
        let Outcome::ResultSet(result_set) = wait(&rx) else {
            panic!("expected a result set");
        };

        let rx = expect(3);
        assert_eq!(fb_result_set_count(result_set, Some(on_count), 3), FB_OK);
        assert!(matches!(wait(&rx), Outcome::Count(2)));

        let rx = expect(4);
        assert_eq!(fb_result_set_collect(result_set, Some(on_collect), 4), FB_OK);
        assert!(matches!(wait(&rx), Outcome::Rows { rows: 2, columns: 2 }));

        assert_eq!(fb_result_set_destroy(result_set), FB_OK);
        assert_eq!(fb_session_destroy(session), FB_OK);
        assert_eq!(fb_runtime_destroy(runtime, 5_000), FB_OK);
    }
}

#[test]
fn test_sql_error_reported_through_callback() {
    let sql = CString::new("SELECT * FROM no_such_table").unwrap();
    unsafe {
        let mut runtime = ptr::null_mut();
        assert_eq!(fb_runtime_new(1, 0, &mut runtime), FB_OK);
        let mut session = ptr::null_mut();
        assert_eq!(fb_session_new(runtime, &mut session), FB_OK);

        let rx = expect(10);
        assert_eq!(
            fb_session_sql(session, sql.as_ptr(), FbBytes::empty(), Some(on_result_set), 10),
            FB_OK
        );
        match wait(&rx) {
            Outcome::Error(kind, message) => {
                assert_eq!(kind, FB_ERR_SQL);
                assert!(message.contains("no_such_table"), "{message}");
            }
            other => panic!("expected an error, got {other:?}"),
        }

        // refused synchronously, the callback never fires
        assert_eq!(
            fb_session_sql(session, sql.as_ptr(), FbBytes::empty(), None, 11),
            FB_ERR_INVALID_ARGUMENT
        );

        assert_eq!(fb_session_destroy(session), FB_OK);
        assert_eq!(fb_runtime_destroy(runtime, 5_000), FB_OK);
    }
}
